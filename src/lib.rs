//! # DPScope RS
//!
//! A Rust library for driving the DPScope, a dual-channel USB oscilloscope,
//! over its binary serial protocol.
//!
//! ## Features
//!
//! - **Device discovery**: Uses `serialport` to find USB serial ports and validates them by ping
//! - **Strict wire protocol**: Acknowledgements, post-acknowledgements and trailing-byte checks on every command
//! - **Calibrated voltages**: USB reference calibration, gain/pregain and resolution handling
//! - **Streaming**: A drift-resistant background worker feeding a queue of voltage pairs
//! - **Block capture**: Time-domain and FFT captures from the device buffer
//! - **DataFrame output**: Captures and streamed samples export to `polars`
//!
//! ## Examples
//!
//! ### Connect and stream
//!
//! ```rust,no_run
//! use dpscope_rs::{Channel, DpScope};
//! use std::time::Duration;
//!
//! let mut scope = DpScope::connect(None)?;
//! scope.set_input_range_by_label(Channel::Ch1, "1 V/div")?;
//! scope.set_period(Duration::from_millis(20))?;
//!
//! scope.start_streaming()?;
//! let queue = scope.queue();
//! for pair in queue.iter().take(100) {
//!     println!("{:.3} V  {:.3} V", pair.ch1, pair.ch2);
//! }
//! scope.stop_streaming()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Capture a block
//!
//! ```rust,no_run
//! use dpscope_rs::{CaptureMode, DpScope, Trigger, TriggerSource};
//!
//! let mut scope = DpScope::connect(Some("/dev/ttyUSB0"))?;
//! scope.apply_trigger(Trigger::start_capturing_when(TriggerSource::Ch1).rising_edge())?;
//!
//! let capture = scope.poll(CaptureMode::TimeDomain)?;
//! println!("{}", capture.to_dataframe()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Trigger configuration
//!
//! ```rust
//! use dpscope_rs::trigger_config::{Trigger, TriggerPolarity, TriggerSource};
//!
//! let trigger = Trigger::start_capturing_when(TriggerSource::Ch2)
//!     .at_level(512)
//!     .falling_edge();
//! assert_eq!(trigger.polarity, TriggerPolarity::Falling);
//! assert_eq!(trigger.into_commands().len(), 3);
//! ```

pub mod acquisition;
pub mod capture;
pub mod command;
pub mod command_channel;
pub mod commands;
pub mod dp_scope;
pub mod events;
pub mod gain;
pub mod input_range;
pub mod rate_meter;
pub mod scope_connector;
pub mod serial_link;
pub mod trigger_config;
pub mod voltage;

// Re-export the main types for convenience
pub use acquisition::{AcquisitionError, AcquisitionScheduler, Clock, SystemClock, VoltageSource};
pub use capture::{Capture, CaptureError, CaptureMode, CapturePoller};
pub use command::{Channel, CommandSpec, Field, Format, Response, Value};
pub use command_channel::{ChannelError, CommandChannel};
pub use dp_scope::{DpScope, DpScopeError};
pub use events::{EventError, EventHandler, EventRegistry};
pub use gain::{GainError, Stage};
pub use input_range::{AcquisitionRate, InputRange, ACQUISITION_RATES, INPUT_RANGES};
pub use rate_meter::RateMeter;
pub use scope_connector::{ConnectorError, ScopeConnector, ScopeDevice};
pub use serial_link::{LinkError, LinkSettings, SerialLink, Transport};
pub use trigger_config::{Trigger, TriggerBuilder, TriggerError, TriggerPolarity, TriggerSource};
pub use voltage::{ConversionError, Resolution, VoltagePair, VoltageReader};
