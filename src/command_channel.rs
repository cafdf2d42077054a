use crate::command::{Channel, CommandSpec, Response, Value};
use crate::commands;
use crate::serial_link::{LinkError, Transport};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Wrong arguments for command {command}: requires {expected} field(s) matching its format, {provided} provided")]
    Framing {
        command: CommandSpec,
        expected: usize,
        provided: usize,
    },

    #[error("Command sent was {opcode}; DPScope responded with {received}. Could be connected to a different device, or the scope is malfunctioning")]
    Acknowledgement { opcode: u8, received: u8 },

    #[error("{pending} unexpected unread bytes after response to command {opcode}")]
    TrailingData { opcode: u8, pending: u32 },

    #[error("Command {opcode}: expected {expected} byte(s) from DPScope before the read timeout")]
    ShortRead { opcode: u8, expected: usize },

    #[error("DAC output of {millivolts} mV does not fit the 12-bit DAC field")]
    DacOutOfRange { millivolts: u16 },

    #[error("Serial link was poisoned by a panic during an earlier exchange")]
    Poisoned,

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sole owner of the link to the device.
///
/// Every exchange (write, ack, payload, post-ack, trailing-byte check) runs
/// under one lock, so callers on different threads never interleave bytes on
/// the wire. Nothing here retries.
pub struct CommandChannel {
    link: Mutex<Box<dyn Transport>>,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel").finish_non_exhaustive()
    }
}

impl CommandChannel {
    pub const DAC_MAX_MILLIVOLTS: u16 = 0x0FFF;

    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            link: Mutex::new(Box::new(transport)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>, ChannelError> {
        self.link.lock().map_err(|_| ChannelError::Poisoned)
    }

    /// Send a command and decode its reply per `spec.returns`.
    pub fn send(&self, spec: &CommandSpec, args: &[Value]) -> Result<Response, ChannelError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::span!("CommandChannel::send");

        let payload = spec.args.pack(args).ok_or(ChannelError::Framing {
            command: *spec,
            expected: spec.args.field_count(),
            provided: args.len(),
        })?;

        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(spec.opcode);
        frame.extend_from_slice(&payload);

        let mut link = self.lock()?;
        log::trace!("-> {} {:02X?}", spec, frame);
        link.write_all(&frame)?;
        link.flush()?;

        if spec.requires_ack {
            Self::expect_ack(&mut **link, spec.opcode)?;
        }

        let mut reply = vec![0u8; spec.returns.size()];
        Self::read_exact(&mut **link, spec.opcode, &mut reply)?;
        log::trace!("<- {} {:02X?}", spec, reply);

        if spec.requires_post_ack {
            Self::expect_ack(&mut **link, spec.opcode)?;
        }

        Self::expect_drained(&**link, spec.opcode)?;

        let values = spec
            .returns
            .unpack(&reply)
            .ok_or(ChannelError::ShortRead {
                opcode: spec.opcode,
                expected: spec.returns.size(),
            })?;
        Ok(Response(values))
    }

    /// Read back `count` sample pairs from the capture buffer.
    ///
    /// Returns `Ok(None)` while the device reports that no completed block is
    /// available yet.
    pub fn readback(&self, count: u8) -> Result<Option<Vec<u8>>, ChannelError> {
        let opcode = commands::READ_BACK.opcode;
        let mut link = self.lock()?;
        link.write_all(&[opcode, count])?;
        link.flush()?;

        let mut status = [0u8; 1];
        Self::read_exact(&mut **link, opcode, &mut status)?;

        let block = if status[0] != 0 {
            let mut block = vec![0u8; 1 + 2 * usize::from(count)];
            Self::read_exact(&mut **link, opcode, &mut block)?;
            Some(block)
        } else {
            None
        };

        Self::expect_drained(&**link, opcode)?;
        Ok(block)
    }

    /// Drive a channel's DAC output.
    pub fn set_dac(&self, channel: Channel, millivolts: u16) -> Result<Response, ChannelError> {
        if millivolts > Self::DAC_MAX_MILLIVOLTS {
            return Err(ChannelError::DacOutOfRange { millivolts });
        }
        let [high, low] = dac_bytes(channel, millivolts);
        self.send(&commands::SET_DAC, &[Value::U8(high), Value::U8(low)])
    }

    fn read_exact<T: Transport + ?Sized>(
        link: &mut T,
        opcode: u8,
        buf: &mut [u8],
    ) -> Result<(), ChannelError> {
        let expected = buf.len();
        link.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::UnexpectedEof | ErrorKind::WouldBlock => {
                ChannelError::ShortRead { opcode, expected }
            }
            _ => ChannelError::Io(e),
        })
    }

    fn expect_ack<T: Transport + ?Sized>(link: &mut T, opcode: u8) -> Result<(), ChannelError> {
        let mut ack = [0u8; 1];
        Self::read_exact(link, opcode, &mut ack)?;
        if ack[0] != opcode {
            return Err(ChannelError::Acknowledgement {
                opcode,
                received: ack[0],
            });
        }
        Ok(())
    }

    fn expect_drained<T: Transport + ?Sized>(link: &T, opcode: u8) -> Result<(), ChannelError> {
        match link.bytes_pending()? {
            0 => Ok(()),
            pending => Err(ChannelError::TrailingData { opcode, pending }),
        }
    }
}

/// Bit-pack a DAC request: `(channel << 7) | 0x10 | (mV >> 8)`, then `mV & 0xFF`.
fn dac_bytes(channel: Channel, millivolts: u16) -> [u8; 2] {
    let high = (channel.code() << 7) | 0x10 | (millivolts >> 8) as u8;
    let low = (millivolts & 0xFF) as u8;
    [high, low]
}
