use crate::acquisition::{AcquisitionError, AcquisitionScheduler, DEFAULT_PERIOD};
use crate::capture::{Capture, CaptureError, CaptureMode, CapturePoller};
use crate::command::{Channel, CommandSpec, Response, Value};
use crate::command_channel::{ChannelError, CommandChannel};
use crate::commands;
use crate::input_range::{AcquisitionRate, InputRange};
use crate::scope_connector::{ConnectorError, ScopeConnector};
use crate::serial_link::{LinkSettings, Transport};
use crate::trigger_config::{Trigger, TriggerError, TriggerPolarity, TriggerSource};
use crate::voltage::{ConversionError, Resolution, VoltagePair, VoltageReader};
use polars::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const CH1_COLUMN_NAME: &str = "ch1";
const CH2_COLUMN_NAME: &str = "ch2";

#[derive(Debug, thiserror::Error)]
pub enum DpScopeError {
    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Command error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Failed to build sample table: {0}")]
    Polars(#[from] PolarsError),

    #[error("Channel index must be 0 or 1, got {0}")]
    InvalidChannel(u8),

    #[error("Unknown input range {0:?}")]
    UnknownInputRange(String),
}

/// Controller for one connected DPScope.
///
/// Owns the command channel, the calibration state and the streaming worker.
/// Foreground calls and the worker share the channel; every exchange on the
/// wire is atomic, so they never interleave.
pub struct DpScope {
    channel: Arc<CommandChannel>,
    voltage: Arc<VoltageReader>,
    acquisition: AcquisitionScheduler,
    trigger_source: Option<TriggerSource>,
    trigger_polarity: Option<TriggerPolarity>,
    port: Option<String>,
}

impl std::fmt::Debug for DpScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpScope")
            .field("port", &self.port)
            .field("acquisition", &self.acquisition)
            .finish_non_exhaustive()
    }
}

impl DpScope {
    /// Connect to a DPScope, probing USB serial ports when `port` is `None`.
    pub fn connect(port: Option<&str>) -> Result<Self, DpScopeError> {
        Self::connect_with(port, &LinkSettings::default())
    }

    pub fn connect_with(port: Option<&str>, settings: &LinkSettings) -> Result<Self, DpScopeError> {
        let connection = ScopeConnector::connect(port, settings)?;
        Self::from_channel(connection.channel, Some(connection.port))
    }

    /// Drive a scope over an arbitrary transport. No ping validation is done.
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Result<Self, DpScopeError> {
        Self::from_channel(CommandChannel::new(transport), None)
    }

    pub fn from_channel(channel: CommandChannel, port: Option<String>) -> Result<Self, DpScopeError> {
        let channel = Arc::new(channel);
        let voltage = Arc::new(VoltageReader::new(Arc::clone(&channel)));
        let acquisition = AcquisitionScheduler::new(voltage.clone(), DEFAULT_PERIOD)?;
        Ok(Self {
            channel,
            voltage,
            acquisition,
            trigger_source: None,
            trigger_polarity: None,
            port,
        })
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Map a 0-based channel index.
    pub fn channel(index: u8) -> Result<Channel, DpScopeError> {
        Channel::try_from(index).map_err(DpScopeError::InvalidChannel)
    }

    /// Stop streaming and release the device. Any worker error is returned.
    pub fn close(mut self) -> Result<(), DpScopeError> {
        self.stop_streaming()
    }

    // ====== STREAMING ======

    pub fn start_streaming(&mut self) -> Result<(), DpScopeError> {
        Ok(self.acquisition.start()?)
    }

    pub fn stop_streaming(&mut self) -> Result<(), DpScopeError> {
        Ok(self.acquisition.stop()?)
    }

    pub fn is_streaming(&self) -> bool {
        self.acquisition.is_running()
    }

    pub fn set_period(&self, period: Duration) -> Result<(), DpScopeError> {
        Ok(self.acquisition.set_period(period)?)
    }

    pub fn period(&self) -> Duration {
        self.acquisition.period()
    }

    pub fn set_acquisition_rate(&self, rate: &AcquisitionRate) -> Result<(), DpScopeError> {
        log::info!("Acquisition rate set to {}", rate.label);
        self.set_period(rate.period())
    }

    /// Consumer end of the streaming queue.
    pub fn queue(&self) -> flume::Receiver<VoltagePair> {
        self.acquisition.receiver()
    }

    pub fn drain_samples(&self) -> Vec<VoltagePair> {
        self.acquisition.drain()
    }

    /// Drop everything queued so far. Returns how many samples were dropped.
    pub fn clear_queue(&self) -> usize {
        self.acquisition.drain().len()
    }

    /// Drain the queue into a table with `ch1` and `ch2` voltage columns.
    pub fn drain_to_dataframe(&self) -> Result<DataFrame, DpScopeError> {
        let samples = self.drain_samples();
        let ch1: Vec<f64> = samples.iter().map(|s| s.ch1).collect();
        let ch2: Vec<f64> = samples.iter().map(|s| s.ch2).collect();
        Ok(DataFrame::new(vec![
            Series::new(CH1_COLUMN_NAME.into(), ch1).into(),
            Series::new(CH2_COLUMN_NAME.into(), ch2).into(),
        ])?)
    }

    /// Samples per second the worker delivered over the last second.
    pub fn achieved_rate(&self) -> f64 {
        self.acquisition.achieved_rate()
    }

    // ====== MEASUREMENT ======

    pub fn read_single(&self) -> Result<VoltagePair, DpScopeError> {
        Ok(self.voltage.read()?)
    }

    /// Raw 10-bit ADC codes, uncalibrated.
    pub fn read_raw_10bit(&self) -> Result<[u16; 2], DpScopeError> {
        Ok(self.voltage.read_raw_10bit()?)
    }

    pub fn usb_reference_voltage(&self) -> Result<f64, DpScopeError> {
        Ok(self.voltage.usb_reference_voltage()?)
    }

    /// Force the next read to measure the USB reference again.
    pub fn recalibrate(&self) -> Result<f64, DpScopeError> {
        Ok(self.voltage.recalibrate()?)
    }

    /// Capture one block from the device buffer.
    pub fn poll(&self, mode: CaptureMode) -> Result<Capture, DpScopeError> {
        Ok(CapturePoller::new(Arc::clone(&self.channel), mode).poll()?)
    }

    // ====== AMPLIFIERS ======

    pub fn set_gain(&self, channel: Channel, value: u8) -> Result<(), DpScopeError> {
        Ok(self.voltage.set_gain(channel, value)?)
    }

    pub fn set_pregain(&self, channel: Channel, value: u8) -> Result<(), DpScopeError> {
        Ok(self.voltage.set_pregain(channel, value)?)
    }

    pub fn gain(&self, channel: Channel) -> Result<u8, DpScopeError> {
        Ok(self.voltage.gain(channel)?)
    }

    pub fn pregain(&self, channel: Channel) -> Result<u8, DpScopeError> {
        Ok(self.voltage.pregain(channel)?)
    }

    pub fn set_input_range(&self, channel: Channel, range: &InputRange) -> Result<(), DpScopeError> {
        self.set_pregain(channel, range.pregain)?;
        self.set_gain(channel, range.gain)?;
        log::info!("{} input range set to {}", channel, range.label);
        Ok(())
    }

    pub fn set_input_range_by_label(&self, channel: Channel, label: &str) -> Result<(), DpScopeError> {
        let range = InputRange::by_label(label)
            .ok_or_else(|| DpScopeError::UnknownInputRange(label.to_string()))?;
        self.set_input_range(channel, range)
    }

    pub fn set_resolution(&self, resolution: Resolution) -> Result<(), DpScopeError> {
        Ok(self.voltage.set_resolution(resolution)?)
    }

    pub fn resolution(&self) -> Result<Resolution, DpScopeError> {
        Ok(self.voltage.resolution()?)
    }

    // ====== TRIGGER ======

    pub fn set_trigger(
        &mut self,
        source: TriggerSource,
        polarity: TriggerPolarity,
    ) -> Result<(), DpScopeError> {
        self.set_trigger_source(source)?;
        self.set_trigger_polarity(polarity)
    }

    /// Program source, polarity and (when given) level in one go.
    pub fn apply_trigger(&mut self, trigger: Trigger) -> Result<(), DpScopeError> {
        for (spec, args) in trigger.into_commands() {
            self.send(&spec, &args)?;
        }
        self.trigger_source = Some(trigger.source);
        self.trigger_polarity = Some(trigger.polarity);
        log::info!(
            "Trigger set to {} / {}",
            trigger.source.as_str(),
            trigger.polarity.as_str()
        );
        Ok(())
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DpScopeError> {
        self.send_u8(&commands::TRIG_SOURCE, source.code())?;
        self.trigger_source = Some(source);
        Ok(())
    }

    pub fn set_trigger_polarity(&mut self, polarity: TriggerPolarity) -> Result<(), DpScopeError> {
        self.send_u8(&commands::TRIG_POL, polarity.code())?;
        self.trigger_polarity = Some(polarity);
        Ok(())
    }

    /// Current source; programs `Auto` on first use.
    pub fn trigger_source(&mut self) -> Result<TriggerSource, DpScopeError> {
        match self.trigger_source {
            Some(source) => Ok(source),
            None => {
                self.set_trigger_source(TriggerSource::default())?;
                Ok(TriggerSource::default())
            }
        }
    }

    /// Current polarity; programs `Rising` on first use.
    pub fn trigger_polarity(&mut self) -> Result<TriggerPolarity, DpScopeError> {
        match self.trigger_polarity {
            Some(polarity) => Ok(polarity),
            None => {
                self.set_trigger_polarity(TriggerPolarity::default())?;
                Ok(TriggerPolarity::default())
            }
        }
    }

    pub fn set_trigger_level(&self, level: u16) -> Result<(), DpScopeError> {
        self.send(&commands::TRIG_LEVEL, &[Value::U16(level)])?;
        Ok(())
    }

    // ====== DEVICE COMMANDS ======

    /// Raw ping reply; a DPScope answers `b"DPScope"`.
    pub fn ping(&self) -> Result<Vec<u8>, DpScopeError> {
        let response = self.send(&commands::PING, &[])?;
        Ok(response.bytes(0).map(<[u8]>::to_vec).unwrap_or_default())
    }

    /// Firmware revision as (major, minor).
    pub fn revision(&self) -> Result<(u8, u8), DpScopeError> {
        let values = self.send(&commands::REVISION, &[])?.integers();
        match values.as_slice() {
            [major, minor] => Ok((*major as u8, *minor as u8)),
            other => Err(ConversionError::DataShape {
                expected: 2,
                received: other.len(),
            }
            .into()),
        }
    }

    pub fn abort(&self) -> Result<(), DpScopeError> {
        self.send(&commands::ABORT, &[])?;
        Ok(())
    }

    pub fn set_sample_rate(&self, rate: u8) -> Result<(), DpScopeError> {
        self.send_u8(&commands::SAMPLE_RATE, rate)
    }

    pub fn set_noise_reject(&self, enabled: bool) -> Result<(), DpScopeError> {
        self.send_u8(&commands::NOISE_REJECT, u8::from(enabled))
    }

    pub fn set_cal_mode(&self, mode: u8) -> Result<(), DpScopeError> {
        self.send_u8(&commands::CAL_MODE, mode)
    }

    pub fn set_pretrigger_mode(&self, mode: u8) -> Result<(), DpScopeError> {
        self.send_u8(&commands::PRETRIGGER_MODE, mode)
    }

    pub fn set_timer_prescale(&self, prescale: u8) -> Result<(), DpScopeError> {
        self.send_u8(&commands::TIMER_PRESCALE, prescale)
    }

    pub fn set_post_trigger_count(&self, count: u8) -> Result<(), DpScopeError> {
        self.send_u8(&commands::POST_TRIG_CNT, count)
    }

    pub fn set_serial_tx(&self, enabled: bool) -> Result<(), DpScopeError> {
        self.send_u8(&commands::SERIAL_TX, u8::from(enabled))
    }

    pub fn set_status_led(&self, on: bool) -> Result<(), DpScopeError> {
        self.send_u8(&commands::STATUS_LED, u8::from(on))
    }

    pub fn set_delay(&self, delay: u16) -> Result<(), DpScopeError> {
        self.send(&commands::SET_DELAY, &[Value::U16(delay)])?;
        Ok(())
    }

    pub fn set_timer_period(&self, period: u16) -> Result<(), DpScopeError> {
        self.send(&commands::TIMER_PERIOD, &[Value::U16(period)])?;
        Ok(())
    }

    pub fn set_dac(&self, channel: Channel, millivolts: u16) -> Result<(), DpScopeError> {
        self.channel.set_dac(channel, millivolts)?;
        Ok(())
    }

    fn send(&self, spec: &CommandSpec, args: &[Value]) -> Result<Response, DpScopeError> {
        Ok(self.channel.send(spec, args)?)
    }

    fn send_u8(&self, spec: &CommandSpec, value: u8) -> Result<(), DpScopeError> {
        self.send(spec, &[Value::U8(value)])?;
        Ok(())
    }
}
