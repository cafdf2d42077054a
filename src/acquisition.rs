//! Background streaming of single voltage reads at a fixed period.
//!
//! A dedicated worker thread samples a [`VoltageSource`] on a deadline timer
//! and pushes each [`VoltagePair`] onto an unbounded queue. Deadlines advance
//! by exactly one period per read, so a stalled read is followed by
//! back-to-back reads until the schedule has caught up.

use crate::rate_meter::RateMeter;
use crate::voltage::{ConversionError, VoltagePair, VoltageReader};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default interval between reads.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10);
/// How long `stop` sleeps between checks for worker termination.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);
const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Acquisition is already running; stop it before starting again")]
    AlreadyRunning,

    #[error("Sampling period must be non-zero")]
    InvalidPeriod,

    #[error("Acquisition worker failed: {0}")]
    WorkerFailed(#[source] ConversionError),

    #[error("Acquisition worker panicked")]
    WorkerPanicked,

    #[error("Failed to spawn acquisition worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Anything that can produce one calibrated reading on demand.
pub trait VoltageSource: Send + Sync {
    fn read(&self) -> Result<VoltagePair, ConversionError>;
}

impl VoltageSource for VoltageReader {
    fn read(&self) -> Result<VoltagePair, ConversionError> {
        VoltageReader::read(self)
    }
}

/// Time source for the worker loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Block until `deadline` or until a stop signal arrives.
    /// Returns `true` when the worker should stop.
    fn wait_until(&self, deadline: Instant, stop: &flume::Receiver<()>) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_until(&self, deadline: Instant, stop: &flume::Receiver<()>) -> bool {
        match stop.recv_deadline(deadline) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => true,
            Err(flume::RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Target-time pacing: deadlines move by whole periods, never reset to `now`.
#[derive(Debug, Clone, Copy)]
struct Pacer {
    next_deadline: Instant,
}

impl Pacer {
    fn new(start: Instant) -> Self {
        Self {
            next_deadline: start,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    fn advance(&mut self, period: Duration) {
        self.next_deadline += period;
    }
}

struct Worker {
    stop: flume::Sender<()>,
    handle: JoinHandle<Result<u64, ConversionError>>,
}

/// Acquisition Scheduler: idle until [`start`](Self::start), running until
/// [`stop`](Self::stop). At most one worker exists at any time.
pub struct AcquisitionScheduler {
    source: Arc<dyn VoltageSource>,
    clock: Arc<dyn Clock>,
    period_nanos: Arc<AtomicU64>,
    sender: flume::Sender<VoltagePair>,
    samples: flume::Receiver<VoltagePair>,
    meter: Arc<Mutex<RateMeter>>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for AcquisitionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionScheduler")
            .field("period", &self.period())
            .field("running", &self.is_running())
            .field("queued", &self.samples.len())
            .finish_non_exhaustive()
    }
}

fn period_to_nanos(period: Duration) -> Result<u64, AcquisitionError> {
    match u64::try_from(period.as_nanos()) {
        Ok(0) | Err(_) => Err(AcquisitionError::InvalidPeriod),
        Ok(nanos) => Ok(nanos),
    }
}

impl AcquisitionScheduler {
    pub fn new(source: Arc<dyn VoltageSource>, period: Duration) -> Result<Self, AcquisitionError> {
        Self::with_clock(source, Arc::new(SystemClock), period)
    }

    pub fn with_clock(
        source: Arc<dyn VoltageSource>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Result<Self, AcquisitionError> {
        let (sender, samples) = flume::unbounded();
        Ok(Self {
            source,
            clock,
            period_nanos: Arc::new(AtomicU64::new(period_to_nanos(period)?)),
            sender,
            samples,
            meter: Arc::new(Mutex::new(RateMeter::new(RATE_WINDOW))),
            worker: None,
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::Relaxed))
    }

    /// Change the sampling period. Takes effect from the next deadline,
    /// including while running.
    pub fn set_period(&self, period: Duration) -> Result<(), AcquisitionError> {
        self.period_nanos
            .store(period_to_nanos(period)?, Ordering::Relaxed);
        log::debug!("Acquisition period set to {:?}", period);
        Ok(())
    }

    /// A worker exists (it may already have exited on error).
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// A worker exists and has not exited yet.
    pub fn is_worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.worker.is_some() {
            return Err(AcquisitionError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = flume::bounded(1);
        let source = Arc::clone(&self.source);
        let clock = Arc::clone(&self.clock);
        let period_nanos = Arc::clone(&self.period_nanos);
        let samples = self.sender.clone();
        let meter = Arc::clone(&self.meter);
        if let Ok(mut meter) = meter.lock() {
            meter.reset();
        }

        let handle = thread::Builder::new()
            .name("dpscope-acquisition".into())
            .spawn(move || {
                run_worker(
                    source.as_ref(),
                    clock.as_ref(),
                    &period_nanos,
                    &stop_rx,
                    &samples,
                    &meter,
                )
            })?;

        log::info!("Acquisition started (period {:?})", self.period());
        self.worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the worker, wait for it to exit and discard whatever is still queued.
    ///
    /// A no-op when idle. If the worker had exited on a read error, that error
    /// is returned here.
    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // The worker may have exited already and dropped its receiver.
        let _ = worker.stop.try_send(());
        while !worker.handle.is_finished() {
            log::debug!("Waiting for acquisition worker to finish");
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        let outcome = worker.handle.join();

        let discarded = self.samples.drain().count();
        if discarded > 0 {
            log::debug!("Discarded {} queued samples on stop", discarded);
        }

        match outcome {
            Ok(Ok(reads)) => {
                log::info!("Acquisition stopped after {} reads", reads);
                Ok(())
            }
            Ok(Err(e)) => Err(AcquisitionError::WorkerFailed(e)),
            Err(_) => Err(AcquisitionError::WorkerPanicked),
        }
    }

    /// Consumer end of the handoff queue.
    pub fn receiver(&self) -> flume::Receiver<VoltagePair> {
        self.samples.clone()
    }

    pub fn try_next(&self) -> Option<VoltagePair> {
        self.samples.try_recv().ok()
    }

    /// Take everything queued so far without blocking.
    pub fn drain(&self) -> Vec<VoltagePair> {
        self.samples.drain().collect()
    }

    /// Samples per second delivered over the last second.
    pub fn achieved_rate(&self) -> f64 {
        self.meter
            .lock()
            .map_or(0.0, |mut meter| meter.rate_at(self.clock.now()))
    }
}

impl Drop for AcquisitionScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Acquisition ended with error: {}", e);
        }
    }
}

fn run_worker(
    source: &dyn VoltageSource,
    clock: &dyn Clock,
    period_nanos: &AtomicU64,
    stop: &flume::Receiver<()>,
    samples: &flume::Sender<VoltagePair>,
    meter: &Mutex<RateMeter>,
) -> Result<u64, ConversionError> {
    let span = tracing::info_span!("acquisition_worker");
    let _enter = span.enter();

    let mut pacer = Pacer::new(clock.now());
    let mut reads = 0u64;
    loop {
        match stop.try_recv() {
            Ok(()) | Err(flume::TryRecvError::Disconnected) => break,
            Err(flume::TryRecvError::Empty) => {}
        }

        let now = clock.now();
        if !pacer.is_due(now) {
            if clock.wait_until(pacer.next_deadline, stop) {
                break;
            }
            continue;
        }

        let pair = source.read().map_err(|e| {
            log::error!("Acquisition read failed: {}", e);
            e
        })?;
        tracing::trace!(ch1 = pair.ch1, ch2 = pair.ch2, "sample");
        if samples.send(pair).is_err() {
            break;
        }
        reads += 1;
        if let Ok(mut meter) = meter.lock() {
            meter.mark_at(clock.now());
        }
        pacer.advance(Duration::from_nanos(period_nanos.load(Ordering::Relaxed)));
    }
    Ok(reads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Simulated time: waiting jumps straight to the deadline, and the clock
    /// reports a stop once the horizon is passed.
    struct FakeClock {
        origin: Instant,
        elapsed: Mutex<Duration>,
        horizon: Duration,
    }

    impl FakeClock {
        fn new(horizon: Duration) -> Self {
            Self {
                origin: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                horizon,
            }
        }

        fn advance(&self, by: Duration) {
            *self.elapsed.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.origin + *self.elapsed.lock().unwrap()
        }

        fn wait_until(&self, deadline: Instant, stop: &flume::Receiver<()>) -> bool {
            if stop.try_recv().is_ok() {
                return true;
            }
            let target = deadline.saturating_duration_since(self.origin);
            if target > self.horizon {
                *self.elapsed.lock().unwrap() = self.horizon;
                return true;
            }
            let mut elapsed = self.elapsed.lock().unwrap();
            if target > *elapsed {
                *elapsed = target;
            }
            false
        }
    }

    /// Device double that can stall the clock on chosen reads.
    struct CountingSource {
        reads: AtomicUsize,
        clock: Option<Arc<FakeClock>>,
        stalls: Vec<(usize, Duration)>,
        fail_after: Option<usize>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                reads: AtomicUsize::new(0),
                clock: None,
                stalls: Vec::new(),
                fail_after: None,
            }
        }
    }

    impl VoltageSource for CountingSource {
        fn read(&self) -> Result<VoltagePair, ConversionError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(ConversionError::DataShape {
                    expected: 2,
                    received: 0,
                });
            }
            if let Some(clock) = &self.clock {
                for (at, stall) in &self.stalls {
                    if *at == n {
                        clock.advance(*stall);
                    }
                }
            }
            Ok(VoltagePair {
                ch1: n as f64,
                ch2: -(n as f64),
            })
        }
    }

    fn wait_for_worker(scheduler: &AcquisitionScheduler) {
        while scheduler.is_worker_alive() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn run_simulated(horizon: Duration, period: Duration, stalls: Vec<(usize, Duration)>) -> usize {
        let clock = Arc::new(FakeClock::new(horizon));
        let source = Arc::new(CountingSource {
            clock: Some(Arc::clone(&clock)),
            stalls,
            ..CountingSource::new()
        });
        let mut scheduler =
            AcquisitionScheduler::with_clock(source.clone(), clock, period).unwrap();
        scheduler.start().unwrap();
        wait_for_worker(&scheduler);

        let delivered = scheduler.drain();
        scheduler.stop().unwrap();
        assert_eq!(delivered.len(), source.reads.load(Ordering::SeqCst));
        delivered.len()
    }

    fn assert_close(reads: usize, horizon: Duration, period: Duration) {
        let expected = (horizon.as_nanos() / period.as_nanos()) as i64;
        assert!(
            (reads as i64 - expected).abs() <= 1,
            "{reads} reads, expected {expected} +/- 1"
        );
    }

    #[test]
    fn test_read_count_matches_elapsed_periods() {
        let horizon = Duration::from_secs(1);
        let period = Duration::from_millis(10);
        assert_close(run_simulated(horizon, period, Vec::new()), horizon, period);
    }

    #[test]
    fn test_stalls_do_not_accumulate_drift() {
        let horizon = Duration::from_secs(2);
        let period = Duration::from_millis(10);
        let stalls = vec![
            (10, Duration::from_millis(35)),
            (40, Duration::from_millis(120)),
            (100, Duration::from_millis(9)),
        ];
        assert_close(run_simulated(horizon, period, stalls), horizon, period);
    }

    #[test]
    fn test_queue_preserves_order() {
        let clock = Arc::new(FakeClock::new(Duration::from_millis(100)));
        let source = Arc::new(CountingSource::new());
        let mut scheduler =
            AcquisitionScheduler::with_clock(source, clock, Duration::from_millis(10)).unwrap();
        scheduler.start().unwrap();
        wait_for_worker(&scheduler);

        let first = scheduler.try_next().unwrap();
        let second = scheduler.try_next().unwrap();
        assert!(first.ch1 < second.ch1);
        scheduler.stop().unwrap();
        assert!(scheduler.try_next().is_none());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut scheduler =
            AcquisitionScheduler::new(Arc::new(CountingSource::new()), DEFAULT_PERIOD).unwrap();
        assert!(!scheduler.is_running());
        scheduler.stop().unwrap();
        scheduler.stop().unwrap();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut scheduler =
            AcquisitionScheduler::new(Arc::new(CountingSource::new()), DEFAULT_PERIOD).unwrap();
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(AcquisitionError::AlreadyRunning)
        ));
        scheduler.stop().unwrap();
        assert!(!scheduler.is_running());

        // idle again, so a fresh start is allowed
        scheduler.start().unwrap();
        scheduler.stop().unwrap();
    }

    #[test]
    fn test_stop_discards_queued_samples() {
        let mut scheduler = AcquisitionScheduler::new(
            Arc::new(CountingSource::new()),
            Duration::from_millis(1),
        )
        .unwrap();
        let receiver = scheduler.receiver();
        scheduler.start().unwrap();
        receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        scheduler.stop().unwrap();
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_worker_error_is_returned_by_stop() {
        let source = CountingSource {
            fail_after: Some(3),
            ..CountingSource::new()
        };
        let clock = Arc::new(FakeClock::new(Duration::from_secs(1)));
        let mut scheduler =
            AcquisitionScheduler::with_clock(Arc::new(source), clock, Duration::from_millis(10))
                .unwrap();
        scheduler.start().unwrap();
        wait_for_worker(&scheduler);

        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.stop(),
            Err(AcquisitionError::WorkerFailed(ConversionError::DataShape { .. }))
        ));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_period_is_reconfigurable() {
        let scheduler =
            AcquisitionScheduler::new(Arc::new(CountingSource::new()), DEFAULT_PERIOD).unwrap();
        assert_eq!(scheduler.period(), Duration::from_millis(10));
        scheduler.set_period(Duration::from_millis(50)).unwrap();
        assert_eq!(scheduler.period(), Duration::from_millis(50));
        assert!(matches!(
            scheduler.set_period(Duration::ZERO),
            Err(AcquisitionError::InvalidPeriod)
        ));
        assert_eq!(scheduler.period(), Duration::from_millis(50));
    }

    #[test]
    fn test_pacer_advances_by_whole_periods() {
        let start = Instant::now();
        let mut pacer = Pacer::new(start);
        assert!(pacer.is_due(start));
        pacer.advance(Duration::from_millis(10));
        assert!(!pacer.is_due(start + Duration::from_millis(9)));
        // late by 25 ms: the deadline does not jump to now + period
        pacer.advance(Duration::from_millis(10));
        assert_eq!(pacer.next_deadline, start + Duration::from_millis(20));
        assert!(pacer.is_due(start + Duration::from_millis(35)));
    }
}
