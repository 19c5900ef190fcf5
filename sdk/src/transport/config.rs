//! WebSocket transport configuration.
//!
//! Provides configuration options for the WebSocket transport.

use std::time::Duration;

use crate::error::SessionError;

/// Default socket path.
pub const DEFAULT_WS_PATH: &str = "/";

/// Default capacity of the inbound event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Default reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// WebSocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Path appended to the discovered endpoint.
    pub path: String,

    /// Capacity of the inbound event channel.
    pub event_buffer: usize,

    /// Whether to reconnect after an unrequested disconnect.
    pub reconnect: bool,

    /// Initial reconnect delay.
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Maximum reconnection attempts (None = unlimited).
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_WS_PATH.to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            reconnect: true,
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: None,
        }
    }
}

impl WsConfig {
    /// Creates a new configuration with the given socket path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the inbound event channel capacity.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Disables reconnection.
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }

    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect delay.
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Returns the delay before the reconnection attempt following one that
    /// waited `previous`.
    #[must_use]
    pub fn next_delay(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).min(self.max_reconnect_delay)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.event_buffer == 0 {
            return Err(SessionError::InvalidConfig(
                "event_buffer must be > 0".to_string(),
            ));
        }

        if self.reconnect_delay > self.max_reconnect_delay {
            return Err(SessionError::InvalidConfig(
                "reconnect_delay must be <= max_reconnect_delay".to_string(),
            ));
        }

        Ok(())
    }
}
