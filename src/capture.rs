use crate::command::Value;
use crate::command_channel::{ChannelError, CommandChannel};
use crate::commands;
use polars::prelude::*;
use std::sync::Arc;

/// Sample pairs requested per readback; the most the device returns at once.
pub const READBACK_COUNT: u8 = 205;

const INDEX_COLUMN_NAME: &str = "index";
const CH1_COLUMN_NAME: &str = "ch1";
const CH2_COLUMN_NAME: &str = "ch2";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Command error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Capture block is empty (no status byte)")]
    EmptyBlock,

    #[error("Failed to build capture table: {0}")]
    Polars(#[from] PolarsError),
}

/// Layout of the device capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Interleaved `[ch1, ch2, ch1, ch2, ...]` samples.
    TimeDomain,
    /// Channel 1 spectrum followed by channel 2 spectrum.
    FrequencyDomain,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::TimeDomain => "time",
            CaptureMode::FrequencyDomain => "fft",
        }
    }

    fn arm(self, channel: &CommandChannel) -> Result<(), ChannelError> {
        match self {
            CaptureMode::TimeDomain => channel.send(&commands::ARM, &[Value::U8(0)])?,
            CaptureMode::FrequencyDomain => {
                channel.send(&commands::ARM_FFT, &[Value::U8(0), Value::U8(0)])?
            }
        };
        Ok(())
    }

    /// Split a raw readback block (status byte first) into per-channel samples.
    pub fn parse(self, block: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CaptureError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::span!("CaptureMode::parse");

        let data = block.get(1..).ok_or(CaptureError::EmptyBlock)?;
        Ok(match self {
            CaptureMode::TimeDomain => {
                let ch1 = data.iter().step_by(2).copied().collect();
                let ch2 = data.iter().skip(1).step_by(2).copied().collect();
                (ch1, ch2)
            }
            CaptureMode::FrequencyDomain => {
                let (ch1, ch2) = data.split_at(data.len() / 2);
                (ch1.to_vec(), ch2.to_vec())
            }
        })
    }
}

/// One completed block, split by channel. Samples are raw ADC codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub mode: CaptureMode,
    pub ch1: Vec<u8>,
    pub ch2: Vec<u8>,
}

impl Capture {
    pub fn from_block(mode: CaptureMode, block: &[u8]) -> Result<Self, CaptureError> {
        let (ch1, ch2) = mode.parse(block)?;
        Ok(Self { mode, ch1, ch2 })
    }

    /// Table with `index`, `ch1` and `ch2` columns. Rows past the shorter
    /// channel are dropped.
    pub fn to_dataframe(&self) -> Result<DataFrame, CaptureError> {
        let rows = self.ch1.len().min(self.ch2.len());
        let widen = |samples: &[u8]| -> Vec<u32> {
            samples[..rows].iter().map(|s| u32::from(*s)).collect()
        };
        let index: Vec<u32> = (0..rows as u32).collect();

        let df = DataFrame::new(vec![
            Series::new(INDEX_COLUMN_NAME.into(), index).into(),
            Series::new(CH1_COLUMN_NAME.into(), widen(&self.ch1)).into(),
            Series::new(CH2_COLUMN_NAME.into(), widen(&self.ch2)).into(),
        ])?;
        Ok(df)
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), CaptureError> {
        let mut df = self.to_dataframe()?;
        CsvWriter::new(writer).include_header(true).finish(&mut df)?;
        Ok(())
    }
}

/// Block-Capture Poller: arm, wait for a completed block, abort, parse.
#[derive(Debug, Clone)]
pub struct CapturePoller {
    channel: Arc<CommandChannel>,
    mode: CaptureMode,
}

impl CapturePoller {
    pub fn new(channel: Arc<CommandChannel>, mode: CaptureMode) -> Self {
        Self { channel, mode }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn poll(&self) -> Result<Capture, CaptureError> {
        log::debug!("Arming {} capture", self.mode.as_str());
        let block = self.wait_for_block();

        // Reset capture state even when readback failed.
        let aborted = self.channel.send(&commands::ABORT, &[]);
        let block = match (block, aborted) {
            (Ok(block), Ok(_)) => block,
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), Ok(_)) => return Err(e),
            (Err(e), Err(abort_err)) => {
                log::warn!("Abort after failed capture also failed: {}", abort_err);
                return Err(e);
            }
        };

        let capture = Capture::from_block(self.mode, &block)?;
        log::debug!(
            "Captured {} + {} samples",
            capture.ch1.len(),
            capture.ch2.len()
        );
        Ok(capture)
    }

    fn wait_for_block(&self) -> Result<Vec<u8>, CaptureError> {
        self.mode.arm(&self.channel)?;
        let mut polls = 0u64;
        loop {
            polls += 1;
            // The device answers "not ready" promptly, so no sleep here.
            if let Some(block) = self.channel.readback(READBACK_COUNT)? {
                log::trace!("Capture block ready after {} polls", polls);
                return Ok(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_link::mock::MockTransport;

    #[test]
    fn test_time_domain_deinterleave() {
        let (ch1, ch2) = CaptureMode::TimeDomain
            .parse(&[0xAA, 1, 10, 2, 20, 3, 30])
            .unwrap();
        assert_eq!(ch1, vec![1, 2, 3]);
        assert_eq!(ch2, vec![10, 20, 30]);
    }

    #[test]
    fn test_frequency_domain_split_at_floor_midpoint() {
        let (ch1, ch2) = CaptureMode::FrequencyDomain
            .parse(&[0xAA, 1, 2, 3, 4, 5, 6])
            .unwrap();
        assert_eq!(ch1, vec![1, 2, 3]);
        assert_eq!(ch2, vec![4, 5, 6]);

        let (ch1, ch2) = CaptureMode::FrequencyDomain
            .parse(&[0xAA, 1, 2, 3, 4, 5])
            .unwrap();
        assert_eq!(ch1, vec![1, 2]);
        assert_eq!(ch2, vec![3, 4, 5]);
    }

    #[test]
    fn test_empty_block() {
        assert!(matches!(
            CaptureMode::TimeDomain.parse(&[]),
            Err(CaptureError::EmptyBlock)
        ));
        let (ch1, ch2) = CaptureMode::TimeDomain.parse(&[1]).unwrap();
        assert!(ch1.is_empty() && ch2.is_empty());
    }

    fn block(pairs: &[(u8, u8)]) -> Vec<u8> {
        let mut block = vec![1u8];
        for (a, b) in pairs {
            block.extend([*a, *b]);
        }
        block.resize(1 + 2 * usize::from(READBACK_COUNT), 0);
        block
    }

    #[test]
    fn test_poll_arms_waits_and_aborts() {
        let wire = MockTransport::new();
        let poller = CapturePoller::new(
            Arc::new(CommandChannel::new(wire.clone())),
            CaptureMode::TimeDomain,
        );

        let mut ready = vec![1u8];
        ready.extend(block(&[(5, 50), (6, 60)]));
        wire.reply(&[26]).reply(&[0]).reply(&[0]).reply(&ready).reply(&[6]);

        let capture = poller.poll().unwrap();
        assert_eq!(&capture.ch1[..2], &[5, 6]);
        assert_eq!(&capture.ch2[..2], &[50, 60]);
        assert_eq!(capture.ch1.len(), 205);

        assert_eq!(
            wire.written(),
            vec![26, 0, 23, 205, 23, 205, 23, 205, 6]
        );
    }

    #[test]
    fn test_fft_poll_arms_with_two_bytes() {
        let wire = MockTransport::new();
        let poller = CapturePoller::new(
            Arc::new(CommandChannel::new(wire.clone())),
            CaptureMode::FrequencyDomain,
        );
        let mut ready = vec![1u8];
        ready.extend(block(&[]));
        wire.reply(&[45]).reply(&ready).reply(&[6]);

        let capture = poller.poll().unwrap();
        assert_eq!(capture.ch1.len(), 205);
        assert_eq!(capture.ch2.len(), 205);
        assert_eq!(&wire.written()[..3], &[45, 0, 0]);
    }

    #[test]
    fn test_abort_is_sent_after_failed_readback() {
        let wire = MockTransport::new();
        let poller = CapturePoller::new(
            Arc::new(CommandChannel::new(wire.clone())),
            CaptureMode::TimeDomain,
        );
        // readback reply is missing the block body
        wire.reply(&[26]).reply(&[1, 2, 3]).reply(&[6]);

        assert!(matches!(
            poller.poll(),
            Err(CaptureError::Channel(ChannelError::ShortRead { opcode: 23, .. }))
        ));
        assert_eq!(wire.written().last(), Some(&6));
    }

    #[test]
    fn test_dataframe_truncates_to_shorter_channel() {
        let capture = Capture {
            mode: CaptureMode::FrequencyDomain,
            ch1: vec![1, 2],
            ch2: vec![3, 4, 5],
        };
        let df = capture.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
        let ch2: Vec<u32> = df
            .column("ch2")
            .unwrap()
            .u32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(ch2, vec![3, 4]);
    }

    #[test]
    fn test_csv_export() {
        let capture = Capture::from_block(CaptureMode::TimeDomain, &[0, 7, 8]).unwrap();
        let mut out = Vec::new();
        capture.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("index,ch1,ch2"));
        assert!(text.contains("0,7,8"));
    }
}
