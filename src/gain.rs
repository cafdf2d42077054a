//! Gain and pregain code tables.
//!
//! Each amplifier stage accepts a small set of device codes, each mapping to a
//! fixed multiplication factor. The mapping is bijective, so both directions
//! are exact-match lookups in the same table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gain,
    PreGain,
}

impl Stage {
    pub fn table(self) -> &'static [(u8, u8)] {
        match self {
            Stage::Gain => GAIN_TABLE,
            Stage::PreGain => PREGAIN_TABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Gain => "gain",
            Stage::PreGain => "pregain",
        }
    }
}

/// (code, factor) pairs for the main amplifier.
pub const GAIN_TABLE: &[(u8, u8)] = &[
    (0, 1),
    (1, 2),
    (2, 4),
    (3, 5),
    (4, 8),
    (5, 10),
    (6, 16),
    (7, 32),
];

/// (code, factor) pairs for the input pregain stage.
pub const PREGAIN_TABLE: &[(u8, u8)] = &[(0, 1), (1, 10)];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GainError {
    #[error("Invalid {stage} code {code}. Possible codes are {known:?}")]
    UnknownCode {
        stage: &'static str,
        code: u8,
        known: Vec<u8>,
    },

    #[error("Invalid {stage} value {value}. Possible values are {known:?}")]
    UnknownValue {
        stage: &'static str,
        value: u8,
        known: Vec<u8>,
    },
}

pub fn code_to_value(stage: Stage, code: u8) -> Result<u8, GainError> {
    let table = stage.table();
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, v)| *v)
        .ok_or_else(|| GainError::UnknownCode {
            stage: stage.as_str(),
            code,
            known: table.iter().map(|(c, _)| *c).collect(),
        })
}

pub fn value_to_code(stage: Stage, value: u8) -> Result<u8, GainError> {
    let table = stage.table();
    table
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(c, _)| *c)
        .ok_or_else(|| GainError::UnknownValue {
            stage: stage.as_str(),
            value,
            known: table.iter().map(|(_, v)| *v).collect(),
        })
}
