use crate::command::{CommandSpec, Value};
use crate::commands;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Trigger source can be 0 (auto), 1 (ch1) or 2 (ch2). Requested source is {0}")]
    InvalidSource(u8),

    #[error("Trigger polarity can be 0 (rising) or 1 (falling). Requested polarity is {0}")]
    InvalidPolarity(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSource {
    /// Free-running, no trigger condition.
    #[default]
    Auto = 0,
    Ch1 = 1,
    Ch2 = 2,
}

impl TriggerSource {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Auto => "auto",
            TriggerSource::Ch1 => "ch1",
            TriggerSource::Ch2 => "ch2",
        }
    }
}

impl TryFrom<u8> for TriggerSource {
    type Error = TriggerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TriggerSource::Auto),
            1 => Ok(TriggerSource::Ch1),
            2 => Ok(TriggerSource::Ch2),
            other => Err(TriggerError::InvalidSource(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPolarity {
    #[default]
    Rising = 0,
    Falling = 1,
}

impl TriggerPolarity {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPolarity::Rising => "rising",
            TriggerPolarity::Falling => "falling",
        }
    }
}

impl TryFrom<u8> for TriggerPolarity {
    type Error = TriggerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TriggerPolarity::Rising),
            1 => Ok(TriggerPolarity::Falling),
            other => Err(TriggerError::InvalidPolarity(other)),
        }
    }
}

#[derive(Debug)]
pub struct TriggerBuilder {
    source: TriggerSource,
    level: Option<u16>,
}

impl TriggerBuilder {
    /// Also program the trigger comparator level (raw DAC units).
    pub fn at_level(mut self, level: u16) -> Self {
        self.level = Some(level);
        self
    }

    pub fn rising_edge(self) -> Trigger {
        Trigger::new(self.source, TriggerPolarity::Rising, self.level)
    }

    pub fn falling_edge(self) -> Trigger {
        Trigger::new(self.source, TriggerPolarity::Falling, self.level)
    }
}

/// Complete trigger setup for block captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub source: TriggerSource,
    pub polarity: TriggerPolarity,
    pub level: Option<u16>,
}

impl Trigger {
    pub fn new(source: TriggerSource, polarity: TriggerPolarity, level: Option<u16>) -> Self {
        Self {
            source,
            polarity,
            level,
        }
    }

    pub fn start_capturing_when(source: TriggerSource) -> TriggerBuilder {
        TriggerBuilder {
            source,
            level: None,
        }
    }

    /// Free-running trigger; the polarity is irrelevant but still sent.
    pub fn auto() -> Self {
        Self::new(TriggerSource::Auto, TriggerPolarity::Rising, None)
    }

    /// Commands that program this trigger, in the order they are sent.
    pub fn into_commands(self) -> Vec<(CommandSpec, Vec<Value>)> {
        let mut frames = vec![
            (commands::TRIG_SOURCE, vec![Value::U8(self.source.code())]),
            (commands::TRIG_POL, vec![Value::U8(self.polarity.code())]),
        ];
        if let Some(level) = self.level {
            frames.push((commands::TRIG_LEVEL, vec![Value::U16(level)]));
        }
        frames
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::auto()
    }
}
