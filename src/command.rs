//! Fixed-format command descriptors and their big-endian wire codec.

use std::fmt;

/// Input channel of the scope. The device addresses them as 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ch1 = 0,
    Ch2 = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = u8;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Channel::Ch1),
            1 => Ok(Channel::Ch2),
            other => Err(other),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.index() + 1)
    }
}

/// One fixed-width field in an argument or return layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    U8,
    U16,
    /// Fixed-length byte string.
    Bytes(usize),
}

impl Field {
    pub const fn width(self) -> usize {
        match self {
            Field::U8 => 1,
            Field::U16 => 2,
            Field::Bytes(n) => n,
        }
    }
}

/// A decoded (or to-be-encoded) field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    Bytes(Vec<u8>),
}

impl Value {
    fn matches(&self, field: Field) -> bool {
        match (self, field) {
            (Value::U8(_), Field::U8) | (Value::U16(_), Field::U16) => true,
            (Value::Bytes(b), Field::Bytes(n)) => b.len() == n,
            _ => false,
        }
    }

    /// Widen any integer value; byte strings have no numeric reading.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::U8(v) => Some(u16::from(*v)),
            Value::U16(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

/// An ordered, fixed-width field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format(pub &'static [Field]);

impl Format {
    pub const EMPTY: Format = Format(&[]);

    pub fn field_count(&self) -> usize {
        self.0.len()
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.0.iter().map(|f| f.width()).sum()
    }

    /// Pack values big-endian. Returns `None` when the values do not line up
    /// with the fields, either in number or in kind.
    pub fn pack(&self, values: &[Value]) -> Option<Vec<u8>> {
        if values.len() != self.0.len() {
            return None;
        }
        let mut out = Vec::with_capacity(self.size());
        for (field, value) in self.0.iter().zip(values) {
            if !value.matches(*field) {
                return None;
            }
            match value {
                Value::U8(v) => out.push(*v),
                Value::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
                Value::Bytes(b) => out.extend_from_slice(b),
            }
        }
        Some(out)
    }

    /// Unpack exactly `self.size()` bytes. Returns `None` on a length mismatch.
    pub fn unpack(&self, bytes: &[u8]) -> Option<Vec<Value>> {
        if bytes.len() != self.size() {
            return None;
        }
        let mut values = Vec::with_capacity(self.0.len());
        let mut offset = 0;
        for field in self.0 {
            let chunk = &bytes[offset..offset + field.width()];
            values.push(match field {
                Field::U8 => Value::U8(chunk[0]),
                Field::U16 => Value::U16(u16::from_be_bytes([chunk[0], chunk[1]])),
                Field::Bytes(_) => Value::Bytes(chunk.to_vec()),
            });
            offset += field.width();
        }
        Some(values)
    }
}

/// Immutable descriptor of a single device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub opcode: u8,
    pub requires_ack: bool,
    pub requires_post_ack: bool,
    pub args: Format,
    pub returns: Format,
}

impl CommandSpec {
    /// A command with the common flags: acknowledged, no post-ack.
    pub const fn new(name: &'static str, opcode: u8) -> Self {
        Self {
            name,
            opcode,
            requires_ack: true,
            requires_post_ack: false,
            args: Format::EMPTY,
            returns: Format::EMPTY,
        }
    }

    pub const fn args(mut self, fields: &'static [Field]) -> Self {
        self.args = Format(fields);
        self
    }

    pub const fn returns(mut self, fields: &'static [Field]) -> Self {
        self.returns = Format(fields);
        self
    }

    pub const fn no_ack(mut self) -> Self {
        self.requires_ack = false;
        self
    }

    pub const fn post_ack(mut self) -> Self {
        self.requires_post_ack = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.opcode)
    }
}

/// Decoded reply to a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response(pub Vec<Value>);

impl Response {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// All integer values widened to `u16`, skipping byte strings.
    pub fn integers(&self) -> Vec<u16> {
        self.0.iter().filter_map(Value::as_u16).collect()
    }

    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        match self.0.get(index) {
            Some(Value::Bytes(b)) => Some(b),
            _ => None,
        }
    }
}
