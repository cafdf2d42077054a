use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Byte transport underneath the command channel.
///
/// Anything that can read, write and report how many received bytes are still
/// waiting can carry DPScope traffic. The serial port is the production
/// implementation; tests script replies through an in-memory transport.
pub trait Transport: Read + Write + Send {
    /// Number of received bytes not yet consumed.
    fn bytes_pending(&self) -> Result<u32, LinkError>;

    /// Discard anything buffered in either direction.
    fn discard_buffers(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Line settings for the DPScope serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl LinkSettings {
    pub const BAUD_RATE: u32 = 500_000;
    pub const READ_TIMEOUT: Duration = Duration::from_secs(1);
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: Self::BAUD_RATE,
            timeout: Self::READ_TIMEOUT,
        }
    }
}

/// Serial connection to a DPScope, 8N1 with a bounded read timeout.
#[derive(Debug)]
pub struct SerialLink {
    serial: Box<dyn SerialPort>,
    port: String,
}

impl SerialLink {
    /// Open the given port with the default DPScope line settings.
    pub fn open(port: &str) -> Result<Self, LinkError> {
        Self::open_with(port, &LinkSettings::default())
    }

    pub fn open_with(port: &str, settings: &LinkSettings) -> Result<Self, LinkError> {
        log::info!(
            "Opening connection to DPScope (port: {} | baudrate: {})",
            port,
            settings.baud_rate
        );
        let serial = serialport::new(port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(settings.timeout)
            .open()?;

        let mut link = Self {
            serial,
            port: port.to_string(),
        };
        link.discard_buffers()?;
        Ok(link)
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.serial.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.serial.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.serial.flush()
    }
}

impl Transport for SerialLink {
    fn bytes_pending(&self) -> Result<u32, LinkError> {
        Ok(self.serial.bytes_to_read()?)
    }

    fn discard_buffers(&mut self) -> Result<(), LinkError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        log::info!("Closing connection to DPScope on {}", self.port);
    }
}
