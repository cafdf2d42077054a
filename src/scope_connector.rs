use crate::command_channel::{ChannelError, CommandChannel};
use crate::commands;
use crate::serial_link::{LinkError, LinkSettings, SerialLink};
use serialport::SerialPortType;

/// Reply the firmware sends to a ping.
pub const PING_REPLY: &[u8] = b"DPScope";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDevice {
    pub port: String,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Command error: {0}")]
    Channel(#[from] ChannelError),

    #[error("No DPScope device found. Please connect a DPScope or specify the port manually")]
    DeviceNotFound,

    #[error("Port {port} is not a DPScope (ping answered {reply:?})")]
    DeviceValidationFailed { port: String, reply: Vec<u8> },
}

impl From<serialport::Error> for ConnectorError {
    fn from(e: serialport::Error) -> Self {
        Self::Link(e.into())
    }
}

/// A validated connection: the command channel plus the port it runs on.
#[derive(Debug)]
pub struct Connection {
    pub channel: CommandChannel,
    pub port: String,
}

pub struct ScopeConnector;

impl ScopeConnector {
    /// Connect to a DPScope, probing every USB serial port when `port` is `None`.
    pub fn connect(
        port: Option<&str>,
        settings: &LinkSettings,
    ) -> Result<Connection, ConnectorError> {
        if let Some(port) = port {
            log::debug!("Connecting to DPScope on port {}", port);
            return Self::open_validated(port, settings);
        }

        for device in Self::get_available_devices()? {
            match Self::open_validated(&device.port, settings) {
                Ok(connection) => return Ok(connection),
                Err(e) => log::debug!("Skipping {}: {}", device.port, e),
            }
        }
        Err(ConnectorError::DeviceNotFound)
    }

    /// USB serial ports that could carry a DPScope. Nothing is opened here.
    pub fn get_available_devices() -> Result<Vec<ScopeDevice>, ConnectorError> {
        let devices = serialport::available_ports()?
            .into_iter()
            .filter_map(|info| match info.port_type {
                SerialPortType::UsbPort(usb) => Some(ScopeDevice {
                    port: info.port_name,
                    product: usb.product,
                    serial_number: usb.serial_number,
                }),
                _ => None,
            })
            .collect::<Vec<_>>();
        log::debug!("Found {} USB serial port(s)", devices.len());
        Ok(devices)
    }

    fn open_validated(port: &str, settings: &LinkSettings) -> Result<Connection, ConnectorError> {
        let link = SerialLink::open_with(port, settings)?;
        let channel = CommandChannel::new(link);
        Self::validate(&channel, port)?;
        Ok(Connection {
            channel,
            port: port.to_string(),
        })
    }

    /// Ping the device and check it identifies as a DPScope.
    pub fn validate(channel: &CommandChannel, port: &str) -> Result<(), ConnectorError> {
        let response = channel.send(&commands::PING, &[])?;
        match response.bytes(0) {
            Some(reply) if reply == PING_REPLY => {
                log::info!("DPScope found on {}", port);
                Ok(())
            }
            reply => Err(ConnectorError::DeviceValidationFailed {
                port: port.to_string(),
                reply: reply.map(<[u8]>::to_vec).unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_link::mock::MockTransport;

    #[test]
    fn test_validate_accepts_dpscope() {
        let wire = MockTransport::new();
        let channel = CommandChannel::new(wire.clone());
        wire.reply(b"DPScope");
        ScopeConnector::validate(&channel, "mock").unwrap();
        assert_eq!(wire.written(), vec![4]);
    }

    #[test]
    fn test_validate_rejects_other_device() {
        let wire = MockTransport::new();
        let channel = CommandChannel::new(wire.clone());
        wire.reply(b"Arduino");
        let err = ScopeConnector::validate(&channel, "mock").unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::DeviceValidationFailed { ref port, ref reply }
                if port == "mock" && reply == b"Arduino"
        ));
    }

    #[test]
    fn test_validate_silent_port() {
        let channel = CommandChannel::new(MockTransport::new());
        assert!(matches!(
            ScopeConnector::validate(&channel, "mock"),
            Err(ConnectorError::Channel(ChannelError::ShortRead { opcode: 4, .. }))
        ));
    }

    #[test]
    fn test_get_available_devices() {
        // Depends on the host; only checks that listing does not fail oddly.
        if let Ok(devices) = ScopeConnector::get_available_devices() {
            for device in devices {
                assert!(!device.port.is_empty());
            }
        }
    }
}
