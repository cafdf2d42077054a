//! Front-end events, dispatched by channel name.
//!
//! The handler list is built once, explicitly, and looked up by the channel
//! name a front end publishes (for example `"Acquisition.Start"`).

use crate::capture::CaptureMode;
use crate::dp_scope::{DpScope, DpScopeError};

pub const START_CHANNEL: &str = "Acquisition.Start";
pub const STOP_CHANNEL: &str = "Acquisition.Stop";
pub const POLL_CHANNEL: &str = "Acquisition.Poll";
pub const CLEAR_CHANNEL: &str = "Acquisition.Clear";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("No handler registered for channel {0:?}")]
    UnknownChannel(String),

    #[error("Handler for {channel} failed: {source}")]
    Scope {
        channel: &'static str,
        #[source]
        source: DpScopeError,
    },
}

pub trait EventHandler: Send + Sync {
    fn channel(&self) -> &'static str;

    fn handle(&self, scope: &mut DpScope) -> Result<(), DpScopeError>;
}

#[derive(Debug, Default)]
pub struct StartHandler;

impl EventHandler for StartHandler {
    fn channel(&self) -> &'static str {
        START_CHANNEL
    }

    fn handle(&self, scope: &mut DpScope) -> Result<(), DpScopeError> {
        log::info!("Start requested (period {:?})", scope.period());
        scope.start_streaming()
    }
}

#[derive(Debug, Default)]
pub struct StopHandler;

impl EventHandler for StopHandler {
    fn channel(&self) -> &'static str {
        STOP_CHANNEL
    }

    fn handle(&self, scope: &mut DpScope) -> Result<(), DpScopeError> {
        log::info!("Stop requested");
        scope.stop_streaming()
    }
}

#[derive(Debug)]
pub struct PollHandler {
    pub mode: CaptureMode,
}

impl Default for PollHandler {
    fn default() -> Self {
        Self {
            mode: CaptureMode::TimeDomain,
        }
    }
}

impl EventHandler for PollHandler {
    fn channel(&self) -> &'static str {
        POLL_CHANNEL
    }

    fn handle(&self, scope: &mut DpScope) -> Result<(), DpScopeError> {
        log::info!("Poll requested");
        let capture = scope.poll(self.mode)?;
        log::info!(
            "Polled {} samples per channel",
            capture.ch1.len().min(capture.ch2.len())
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ClearHandler;

impl EventHandler for ClearHandler {
    fn channel(&self) -> &'static str {
        CLEAR_CHANNEL
    }

    fn handle(&self, scope: &mut DpScope) -> Result<(), DpScopeError> {
        let dropped = scope.clear_queue();
        log::info!("Clear requested, dropped {} queued samples", dropped);
        Ok(())
    }
}

/// Explicit list of handlers; several may share a channel.
#[derive(Default)]
pub struct EventRegistry {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start, stop, poll and clear.
    pub fn standard() -> Self {
        Self::new()
            .with(StartHandler)
            .with(StopHandler)
            .with(PollHandler::default())
            .with(ClearHandler)
    }

    pub fn with<H: EventHandler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn register<H: EventHandler + 'static>(&mut self, handler: H) {
        log::debug!("Registered handler for {}", handler.channel());
        self.handlers.push(Box::new(handler));
    }

    pub fn channels(&self) -> Vec<&'static str> {
        let mut channels: Vec<&'static str> = self.handlers.iter().map(|h| h.channel()).collect();
        channels.dedup();
        channels
    }

    /// Run every handler registered for `channel`, in registration order.
    pub fn dispatch(&self, channel: &str, scope: &mut DpScope) -> Result<(), EventError> {
        let mut matched = false;
        for handler in self.handlers.iter().filter(|h| h.channel() == channel) {
            matched = true;
            handler.handle(scope).map_err(|source| EventError::Scope {
                channel: handler.channel(),
                source,
            })?;
        }
        if matched {
            Ok(())
        } else {
            Err(EventError::UnknownChannel(channel.to_string()))
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}
