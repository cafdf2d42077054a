//! Raw ADC to voltage conversion and USB reference calibration.
//!
//! The DPScope measures relative to its USB supply, which is rarely exactly
//! 5 V. The reference is measured once per connection by driving both DACs to
//! a known output and comparing against what the ADCs report.

use crate::command::{Channel, Value};
use crate::command_channel::{ChannelError, CommandChannel};
use crate::commands;
use crate::gain::{self, GainError, Stage};
use std::sync::{Arc, Mutex, MutexGuard};

/// DAC output used while calibrating.
pub const CALIBRATION_DAC_MILLIVOLTS: u16 = 3000;
/// ADC code expected for the calibration output on an ideal 5 V supply.
pub const NOMINAL_DAC: f64 = CALIBRATION_DAC_MILLIVOLTS as f64 / 1000.0 * (256.0 / 1.25);
/// Attenuation of the divider at the probe input.
pub const POT_RATIO: f64 = 4.0;
/// Full-scale code of the 8-bit ADC.
pub const MAX_ADC_CODE: f64 = 255.0;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("There should be {expected} ADC values returned by DPScope. Received {received} instead")]
    DataShape { expected: usize, received: usize },

    #[error("ADC resolution can be 0 (high) or 1 (low). Requested resolution is {0}")]
    InvalidResolution(u8),

    #[error("Calibration measured a zero DAC offset")]
    ZeroOffset,

    #[error("Conversion state was poisoned by a panic")]
    Poisoned,

    #[error("Command error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Gain error: {0}")]
    Gain(#[from] GainError),
}

/// ADC resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Full ADC range over a quarter of the input span.
    High = 0,
    /// Quarter resolution, full input span.
    Low = 1,
}

impl Resolution {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Largest measurable voltage at the ADC for a given USB reference.
    pub fn max_voltage(self, usb_reference: f64) -> f64 {
        match self {
            Resolution::Low => usb_reference,
            Resolution::High => usb_reference / 4.0,
        }
    }
}

impl TryFrom<u8> for Resolution {
    type Error = ConversionError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Resolution::High),
            1 => Ok(Resolution::Low),
            other => Err(ConversionError::InvalidResolution(other)),
        }
    }
}

/// A device code together with the factor it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSetting {
    pub code: u8,
    pub value: u8,
}

impl StageSetting {
    fn from_value(stage: Stage, value: u8) -> Result<Self, GainError> {
        Ok(Self {
            code: gain::value_to_code(stage, value)?,
            value,
        })
    }
}

/// Amplifier state of one input channel. `None` until first set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub gain: Option<StageSetting>,
    pub pregain: Option<StageSetting>,
}

/// One simultaneous reading of both channels, in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltagePair {
    pub ch1: f64,
    pub ch2: f64,
}

impl VoltagePair {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Ch1 => self.ch1,
            Channel::Ch2 => self.ch2,
        }
    }
}

/// Convert one raw ADC code to volts.
pub fn adc_to_volts(raw: u8, max_voltage: f64, pregain: u8, gain: u8) -> f64 {
    max_voltage * POT_RATIO / MAX_ADC_CODE
        * f64::from(pregain)
        * f64::from(gain)
        * f64::from(raw)
}

/// Calibration & conversion engine.
///
/// State lives behind separate locks so the streaming worker and foreground
/// callers can share one reader. Lock order is always calibration, then
/// resolution, then channel state, then the command channel. Each setting is
/// held locked across the command that changes it, so the cache never
/// disagrees with the device.
#[derive(Debug)]
pub struct VoltageReader {
    channel: Arc<CommandChannel>,
    usb_reference: Mutex<Option<f64>>,
    resolution: Mutex<Option<Resolution>>,
    channels: Mutex<[ChannelState; 2]>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ConversionError> {
    mutex.lock().map_err(|_| ConversionError::Poisoned)
}

impl VoltageReader {
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        Self {
            channel,
            usb_reference: Mutex::new(None),
            resolution: Mutex::new(None),
            channels: Mutex::new([ChannelState::default(); 2]),
        }
    }

    /// Skip calibration and use a known USB reference voltage.
    pub fn with_usb_reference(channel: Arc<CommandChannel>, volts: f64) -> Self {
        Self {
            usb_reference: Mutex::new(Some(volts)),
            ..Self::new(channel)
        }
    }

    /// Current resolution, setting the device to `Low` on first use.
    pub fn resolution(&self) -> Result<Resolution, ConversionError> {
        let mut current = lock(&self.resolution)?;
        self.resolution_or_default(&mut current)
    }

    fn resolution_or_default(
        &self,
        current: &mut Option<Resolution>,
    ) -> Result<Resolution, ConversionError> {
        match *current {
            Some(resolution) => Ok(resolution),
            None => {
                Self::apply_resolution(&self.channel, Resolution::Low)?;
                *current = Some(Resolution::Low);
                Ok(Resolution::Low)
            }
        }
    }

    pub fn set_resolution(&self, resolution: Resolution) -> Result<(), ConversionError> {
        let mut current = lock(&self.resolution)?;
        Self::apply_resolution(&self.channel, resolution)?;
        *current = Some(resolution);
        log::info!("ADC resolution set to {:?}", resolution);
        Ok(())
    }

    /// Set resolution from a raw device code, rejecting unknown codes before any I/O.
    pub fn set_resolution_code(&self, code: u8) -> Result<(), ConversionError> {
        self.set_resolution(Resolution::try_from(code)?)
    }

    fn apply_resolution(channel: &CommandChannel, resolution: Resolution) -> Result<(), ChannelError> {
        channel
            .send(&commands::ADCON_FROM, &[Value::U8(resolution.code())])
            .map(|_| ())
    }

    /// USB reference voltage, measured on first call and cached afterwards.
    pub fn usb_reference_voltage(&self) -> Result<f64, ConversionError> {
        let mut cached = lock(&self.usb_reference)?;
        self.calibrated(&mut cached)
    }

    /// Measure the USB reference again, replacing the cached value.
    pub fn recalibrate(&self) -> Result<f64, ConversionError> {
        let mut cached = lock(&self.usb_reference)?;
        *cached = None;
        self.calibrated(&mut cached)
    }

    /// Drop the cached reference so the next read recalibrates.
    pub fn invalidate_calibration(&self) -> Result<(), ConversionError> {
        *lock(&self.usb_reference)? = None;
        Ok(())
    }

    // Caller holds the calibration lock; resolution is locked per command.
    fn calibrated(&self, cached: &mut Option<f64>) -> Result<f64, ConversionError> {
        if let Some(volts) = *cached {
            return Ok(volts);
        }

        let original = self.resolution()?;
        if original != Resolution::High {
            self.set_resolution(Resolution::High)?;
        }
        let measured = self.measure_dac_offset();
        if original != Resolution::High {
            // Restore even when the measurement failed.
            let restored = self.set_resolution(original);
            if measured.is_ok() {
                restored?;
            } else if let Err(e) = restored {
                log::warn!("Failed to restore resolution after calibration error: {}", e);
            }
        }
        let measured = measured?;

        if measured == 0.0 {
            return Err(ConversionError::ZeroOffset);
        }
        let volts = 5.0 * NOMINAL_DAC / measured;
        log::info!("Real USB voltage measured to be {:.4} V", volts);
        *cached = Some(volts);
        Ok(volts)
    }

    fn measure_dac_offset(&self) -> Result<f64, ConversionError> {
        let measured = self.drive_dacs_and_measure();

        // Zero both outputs even after a failed measurement.
        let mut zeroed = Ok(());
        for ch in Channel::ALL {
            if let Err(e) = self.channel.set_dac(ch, 0) {
                log::warn!("Failed to zero {} DAC after calibration: {}", ch, e);
                if zeroed.is_ok() {
                    zeroed = Err(e);
                }
            }
        }

        let offsets = measured?;
        zeroed?;
        log::info!(
            "Measured ADC offsets {:?} for DAC output {} mV",
            offsets,
            CALIBRATION_DAC_MILLIVOLTS
        );
        Ok(offsets.iter().map(|v| f64::from(*v)).sum::<f64>() / 2.0)
    }

    fn drive_dacs_and_measure(&self) -> Result<Vec<u16>, ConversionError> {
        for ch in Channel::ALL {
            self.channel.set_dac(ch, CALIBRATION_DAC_MILLIVOLTS)?;
        }
        let offsets = self.channel.send(&commands::MEASURE_OFFSET, &[])?.integers();
        if offsets.len() != 2 {
            return Err(ConversionError::DataShape {
                expected: 2,
                received: offsets.len(),
            });
        }
        Ok(offsets)
    }

    pub fn set_gain(&self, channel: Channel, value: u8) -> Result<(), ConversionError> {
        self.set_stage(Stage::Gain, channel, value)
    }

    pub fn set_pregain(&self, channel: Channel, value: u8) -> Result<(), ConversionError> {
        self.set_stage(Stage::PreGain, channel, value)
    }

    fn set_stage(&self, stage: Stage, channel: Channel, value: u8) -> Result<(), ConversionError> {
        let setting = StageSetting::from_value(stage, value)?;
        let mut channels = lock(&self.channels)?;
        self.apply_stage(&mut channels, stage, channel, setting)
    }

    fn apply_stage(
        &self,
        channels: &mut [ChannelState; 2],
        stage: Stage,
        channel: Channel,
        setting: StageSetting,
    ) -> Result<(), ConversionError> {
        let spec = match stage {
            Stage::Gain => &commands::GAIN,
            Stage::PreGain => &commands::PRE_GAIN,
        };
        self.channel
            .send(spec, &[Value::U8(channel.code()), Value::U8(setting.code)])?;

        let state = &mut channels[channel.index()];
        match stage {
            Stage::Gain => state.gain = Some(setting),
            Stage::PreGain => state.pregain = Some(setting),
        }
        log::info!("{} {} set to {}", channel, stage.as_str(), setting.value);
        Ok(())
    }

    /// Gain factor of a channel, programming the device to 1 on first use.
    pub fn gain(&self, channel: Channel) -> Result<u8, ConversionError> {
        self.stage_value(Stage::Gain, channel)
    }

    /// Pregain factor of a channel, programming the device to 1 on first use.
    pub fn pregain(&self, channel: Channel) -> Result<u8, ConversionError> {
        self.stage_value(Stage::PreGain, channel)
    }

    fn stage_value(&self, stage: Stage, channel: Channel) -> Result<u8, ConversionError> {
        let mut channels = lock(&self.channels)?;
        self.stage_or_default(&mut channels, stage, channel)
    }

    fn stage_or_default(
        &self,
        channels: &mut [ChannelState; 2],
        stage: Stage,
        channel: Channel,
    ) -> Result<u8, ConversionError> {
        let state = channels[channel.index()];
        let current = match stage {
            Stage::Gain => state.gain,
            Stage::PreGain => state.pregain,
        };
        match current {
            Some(setting) => Ok(setting.value),
            None => {
                let setting = StageSetting::from_value(stage, 1)?;
                self.apply_stage(channels, stage, channel, setting)?;
                Ok(setting.value)
            }
        }
    }

    pub fn channel_state(&self, channel: Channel) -> Result<ChannelState, ConversionError> {
        Ok(lock(&self.channels)?[channel.index()])
    }

    /// Read both channels once and convert to volts.
    ///
    /// Calibration, resolution and amplifier settings stay locked until the
    /// ADC has answered, so the factors used always match the sample.
    pub fn read(&self) -> Result<VoltagePair, ConversionError> {
        let mut reference = lock(&self.usb_reference)?;
        let usb_reference = self.calibrated(&mut reference)?;
        let mut resolution = lock(&self.resolution)?;
        let max_voltage = self
            .resolution_or_default(&mut resolution)?
            .max_voltage(usb_reference);

        let mut channels = lock(&self.channels)?;
        let mut factors = [(1u8, 1u8); 2];
        for ch in Channel::ALL {
            factors[ch.index()] = (
                self.stage_or_default(&mut channels, Stage::PreGain, ch)?,
                self.stage_or_default(&mut channels, Stage::Gain, ch)?,
            );
        }

        let raw = self.channel.send(&commands::READ_ADC, &[])?.integers();
        if raw.len() != 2 {
            return Err(ConversionError::DataShape {
                expected: 2,
                received: raw.len(),
            });
        }

        let volts = |ch: Channel| {
            let (pregain, gain) = factors[ch.index()];
            adc_to_volts(raw[ch.index()] as u8, max_voltage, pregain, gain)
        };
        Ok(VoltagePair {
            ch1: volts(Channel::Ch1),
            ch2: volts(Channel::Ch2),
        })
    }

    /// Raw 10-bit ADC codes for both channels.
    pub fn read_raw_10bit(&self) -> Result<[u16; 2], ConversionError> {
        let raw = self.channel.send(&commands::READ_ADC_10, &[])?.integers();
        match raw.as_slice() {
            [ch1, ch2] => Ok([*ch1, *ch2]),
            other => Err(ConversionError::DataShape {
                expected: 2,
                received: other.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_link::mock::MockTransport;
    use std::thread;
    use std::time::Duration;

    fn reader_with_reference(volts: f64) -> (VoltageReader, MockTransport) {
        let wire = MockTransport::new();
        let channel = Arc::new(CommandChannel::new(wire.clone()));
        (VoltageReader::with_usb_reference(channel, volts), wire)
    }

    #[test]
    fn test_conversion_formula() {
        let volts = adc_to_volts(128, Resolution::Low.max_voltage(5.0), 10, 4);
        let expected = 5.0 * 4.0 / 255.0 * 10.0 * 4.0 * 128.0;
        assert!((volts - expected).abs() < f64::EPSILON * expected);
    }

    #[test]
    fn test_high_resolution_quarters_span() {
        assert!((Resolution::High.max_voltage(5.0) - 1.25).abs() < f64::EPSILON);
        assert!((Resolution::Low.max_voltage(5.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_resolution_code_rejected_without_io() {
        let (reader, wire) = reader_with_reference(5.0);
        assert!(matches!(
            reader.set_resolution_code(2),
            Err(ConversionError::InvalidResolution(2))
        ));
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_invalid_gain_rejected_without_io() {
        let (reader, wire) = reader_with_reference(5.0);
        assert!(matches!(
            reader.set_gain(Channel::Ch1, 3),
            Err(ConversionError::Gain(GainError::UnknownValue { value: 3, .. }))
        ));
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_set_gain_sends_code_and_caches_value() {
        let (reader, wire) = reader_with_reference(5.0);
        wire.reply(&[43]);
        reader.set_gain(Channel::Ch2, 16).unwrap();
        assert_eq!(wire.written(), vec![43, 1, 6]);

        let state = reader.channel_state(Channel::Ch2).unwrap();
        assert_eq!(state.gain, Some(StageSetting { code: 6, value: 16 }));
        assert_eq!(state.pregain, None);
        assert_eq!(reader.gain(Channel::Ch2).unwrap(), 16);
    }

    #[test]
    fn test_read_converts_both_channels() {
        let (reader, wire) = reader_with_reference(5.0);
        wire.reply(&[27]).reply(&[42]).reply(&[43]).reply(&[42]).reply(&[43]);
        reader.set_resolution(Resolution::Low).unwrap();
        reader.set_pregain(Channel::Ch1, 10).unwrap();
        reader.set_gain(Channel::Ch1, 4).unwrap();
        reader.set_pregain(Channel::Ch2, 1).unwrap();
        reader.set_gain(Channel::Ch2, 1).unwrap();
        wire.clear_written();

        wire.reply(&[3, 128, 51]);
        let pair = reader.read().unwrap();
        assert_eq!(wire.written(), vec![3]);

        let ch1 = 5.0 * 4.0 / 255.0 * 10.0 * 4.0 * 128.0;
        let ch2 = 5.0 * 4.0 / 255.0 * 51.0;
        assert!((pair.ch1 - ch1).abs() < 1e-9);
        assert!((pair.ch2 - ch2).abs() < 1e-9);
        assert!((pair.get(Channel::Ch2) - ch2).abs() < 1e-9);
    }

    #[test]
    fn test_unset_state_defaults_on_first_read() {
        let (reader, wire) = reader_with_reference(4.0);
        // resolution -> low, then pregain/gain for both channels, then the ADC read
        wire.reply(&[27])
            .reply(&[42])
            .reply(&[43])
            .reply(&[42])
            .reply(&[43])
            .reply(&[3, 255, 0]);
        let pair = reader.read().unwrap();
        assert_eq!(
            wire.written(),
            vec![27, 1, 42, 0, 0, 43, 0, 0, 42, 1, 0, 43, 1, 0, 3]
        );
        assert!((pair.ch1 - 16.0).abs() < 1e-9);
        assert!(pair.ch2.abs() < f64::EPSILON);
    }

    #[test]
    fn test_usb_reference_calibration_restores_resolution() {
        let wire = MockTransport::new();
        let reader = VoltageReader::new(Arc::new(CommandChannel::new(wire.clone())));
        wire.reply(&[27]);
        reader.set_resolution(Resolution::Low).unwrap();
        wire.clear_written();

        // high res, dac ch1, dac ch2, offset 600 + 629, dac ch1 0, dac ch2 0, low res
        wire.reply(&[27])
            .reply(&[44])
            .reply(&[44])
            .reply(&[8, 0x02, 0x58, 0x02, 0x75, 8])
            .reply(&[44])
            .reply(&[44])
            .reply(&[27]);
        let volts = reader.usb_reference_voltage().unwrap();
        assert!((volts - 5.0 * NOMINAL_DAC / 614.5).abs() < 1e-9);
        assert_eq!(
            wire.written(),
            vec![
                27, 0, 44, 0x1B, 0xB8, 44, 0x9B, 0xB8, 8, 44, 0x10, 0x00, 44, 0x90, 0x00, 27, 1
            ]
        );
        assert_eq!(reader.resolution().unwrap(), Resolution::Low);

        // cached: no further traffic
        wire.clear_written();
        assert!((reader.usb_reference_voltage().unwrap() - volts).abs() < f64::EPSILON);
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_calibration_failure_still_restores_resolution() {
        let wire = MockTransport::new();
        let reader = VoltageReader::new(Arc::new(CommandChannel::new(wire.clone())));
        wire.reply(&[27]);
        reader.set_resolution(Resolution::Low).unwrap();

        // the first DAC write is answered with a foreign ack
        wire.reply(&[27])
            .reply(&[99])
            .reply(&[44])
            .reply(&[44])
            .reply(&[27]);
        assert!(matches!(
            reader.usb_reference_voltage(),
            Err(ConversionError::Channel(ChannelError::Acknowledgement { .. }))
        ));
        assert_eq!(reader.resolution().unwrap(), Resolution::Low);
        assert_eq!(wire.written().last(), Some(&1));
    }

    #[test]
    fn test_failed_offset_measurement_zeroes_dacs() {
        let wire = MockTransport::new();
        let reader = VoltageReader::new(Arc::new(CommandChannel::new(wire.clone())));
        wire.reply(&[27]);
        reader.set_resolution(Resolution::Low).unwrap();
        wire.clear_written();

        // offsets arrive but the post-ack is wrong
        wire.reply(&[27])
            .reply(&[44])
            .reply(&[44])
            .reply(&[8, 0x02, 0x66, 0x02, 0x67, 9])
            .reply(&[44])
            .reply(&[44])
            .reply(&[27]);
        assert!(matches!(
            reader.usb_reference_voltage(),
            Err(ConversionError::Channel(ChannelError::Acknowledgement {
                opcode: 8,
                received: 9
            }))
        ));
        assert_eq!(
            wire.written(),
            vec![
                27, 0, 44, 0x1B, 0xB8, 44, 0x9B, 0xB8, 8, 44, 0x10, 0x00, 44, 0x90, 0x00, 27, 1
            ]
        );
        assert_eq!(reader.resolution().unwrap(), Resolution::Low);
    }

    #[test]
    fn test_read_waits_for_calibration_in_progress() {
        let wire = MockTransport::new();
        let reader = Arc::new(VoltageReader::new(Arc::new(CommandChannel::new(
            wire.clone(),
        ))));
        wire.reply(&[27]);
        reader.set_resolution(Resolution::Low).unwrap();

        // calibration, offsets 614 + 615
        wire.reply(&[27])
            .reply(&[44])
            .reply(&[44])
            .reply(&[8, 0x02, 0x66, 0x02, 0x67, 8])
            .reply(&[44])
            .reply(&[44])
            .reply(&[27]);
        // lazy factors, then the ADC
        wire.reply(&[42])
            .reply(&[43])
            .reply(&[42])
            .reply(&[43])
            .reply(&[3, 128, 0]);
        let gate = wire.gate(8);

        let calibrating = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.usb_reference_voltage())
        };
        gate.wait_reached();
        let reading = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read())
        };
        thread::sleep(Duration::from_millis(50));
        gate.release();

        let volts = calibrating.join().unwrap().unwrap();
        let pair = reading.join().unwrap().unwrap();
        assert!((volts - 5.0 * NOMINAL_DAC / 614.5).abs() < 1e-9);
        assert_eq!(reader.resolution().unwrap(), Resolution::Low);

        let expected = volts * 4.0 / 255.0 * 128.0;
        assert!((pair.ch1 - expected).abs() < 1e-9);
    }

    #[test]
    fn test_lazy_default_does_not_undo_concurrent_gain() {
        let wire = MockTransport::new();
        let reader = Arc::new(VoltageReader::with_usb_reference(
            Arc::new(CommandChannel::new(wire.clone())),
            5.0,
        ));
        wire.reply(&[43]);
        let gate = wire.gate(43);

        let setting = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.set_gain(Channel::Ch1, 8))
        };
        gate.wait_reached();
        let querying = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.gain(Channel::Ch1))
        };
        thread::sleep(Duration::from_millis(50));
        gate.release();

        setting.join().unwrap().unwrap();
        assert_eq!(querying.join().unwrap().unwrap(), 8);
        assert_eq!(wire.written(), vec![43, 0, 4]);
        assert_eq!(
            reader.channel_state(Channel::Ch1).unwrap().gain,
            Some(StageSetting { code: 4, value: 8 })
        );
    }

    #[test]
    fn test_raw_10bit_read() {
        let (reader, wire) = reader_with_reference(5.0);
        wire.reply(&[7, 0x03, 0xFF, 0x00, 0x10, 7]);
        assert_eq!(reader.read_raw_10bit().unwrap(), [1023, 16]);
    }
}
