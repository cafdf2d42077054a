//! Front-end presets: volts-per-division input ranges and streaming rates.

use std::time::Duration;

/// Nominal USB supply the ranges are labelled against.
const NOMINAL_VCC: f64 = 5.0;
/// Attenuation of the input divider ahead of the amplifiers.
const SCALE_DOWN: f64 = 4.0;

/// A volts-per-division setting and the amplifier factors that realise it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRange {
    pub label: &'static str,
    pub millivolts_per_div: f64,
    pub pregain: u8,
    pub gain: u8,
}

impl InputRange {
    const fn new(label: &'static str, millivolts_per_div: f64, pregain: u8, gain: u8) -> Self {
        Self {
            label,
            millivolts_per_div,
            pregain,
            gain,
        }
    }

    pub fn cumulative_gain(&self) -> u16 {
        u16::from(self.gain) * u16::from(self.pregain)
    }

    /// Largest input voltage measurable in this range.
    pub fn voltage_max(&self) -> f64 {
        NOMINAL_VCC * SCALE_DOWN / f64::from(self.cumulative_gain())
    }

    pub fn by_label(label: &str) -> Option<&'static InputRange> {
        INPUT_RANGES.iter().find(|r| r.label == label)
    }
}

pub const INPUT_RANGES: &[InputRange] = &[
    InputRange::new("1 V/div", 1000.0, 1, 4),
    InputRange::new("0.5 V/div", 500.0, 1, 8),
    InputRange::new("0.2 V/div", 200.0, 10, 2),
    InputRange::new("0.1 V/div", 100.0, 10, 4),
    InputRange::new("50 mV/div", 50.0, 10, 8),
    InputRange::new("20 mV/div", 20.0, 10, 16),
    InputRange::new("10 mV/div", 10.0, 10, 32),
];

/// Streaming rate expressed as time per plot division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionRate {
    pub label: &'static str,
    pub millis_per_div: u64,
}

impl AcquisitionRate {
    pub const READS_PER_DIV: u64 = 10;

    /// Interval between single reads.
    pub fn period(&self) -> Duration {
        Duration::from_micros(self.millis_per_div * 1000 / Self::READS_PER_DIV)
    }

    pub fn by_label(label: &str) -> Option<&'static AcquisitionRate> {
        ACQUISITION_RATES.iter().find(|r| r.label == label)
    }
}

pub const ACQUISITION_RATES: &[AcquisitionRate] = &[
    AcquisitionRate {
        label: "100 ms/div",
        millis_per_div: 100,
    },
    AcquisitionRate {
        label: "200 ms/div",
        millis_per_div: 200,
    },
    AcquisitionRate {
        label: "500 ms/div",
        millis_per_div: 500,
    },
    AcquisitionRate {
        label: "1 s/div",
        millis_per_div: 1000,
    },
];
