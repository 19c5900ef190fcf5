//! Session configuration.
//!
//! Provides the session level knobs and the protocol contract (event names
//! and reserved payload keys) both sides of the socket must agree on.

use std::time::Duration;

use crate::error::SessionError;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_MS: u64 = 4_000;

/// Discovery status code reserved for "no capacity left".
pub const DEFAULT_EXHAUSTION_CODE: i64 = 2002;

/// Default capacity of the notice broadcast channel.
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// Default capacity of the inbound business message channel.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Payload key a response may use for its request id when it does not echo
/// the configured reserved key.
pub const FALLBACK_RESPONSE_ID_KEY: &str = "id";

/// Event names and reserved payload keys of the session protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Server event assigning the session identity.
    pub identity_event: String,
    /// Server event invalidating the session identity.
    pub reset_event: String,
    /// Server event carrying an application error for the user.
    pub error_event: String,
    /// Server event carrying the response to a correlated request.
    pub response_event: String,
    /// Client keep-alive event.
    pub heartbeat_event: String,
    /// Payload key carrying the session identity.
    pub identity_key: String,
    /// Payload key carrying the connection id in wrapped payloads.
    pub connection_key: String,
    /// Payload key carrying the original value in wrapped payloads.
    pub message_key: String,
    /// Payload key carrying the request id of a correlated request.
    pub request_id_key: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            identity_event: "identity".to_string(),
            reset_event: "reset".to_string(),
            error_event: "app_error".to_string(),
            response_event: "response".to_string(),
            heartbeat_event: "heartbeat".to_string(),
            identity_key: "client_id".to_string(),
            connection_key: "connection_id".to_string(),
            message_key: "message".to_string(),
            request_id_key: "__request_id".to_string(),
        }
    }
}

impl ProtocolConfig {
    /// Validates the protocol names.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty or two reserved keys collide.
    pub fn validate(&self) -> Result<(), SessionError> {
        let names = [
            ("identity_event", &self.identity_event),
            ("reset_event", &self.reset_event),
            ("error_event", &self.error_event),
            ("response_event", &self.response_event),
            ("heartbeat_event", &self.heartbeat_event),
            ("identity_key", &self.identity_key),
            ("connection_key", &self.connection_key),
            ("message_key", &self.message_key),
            ("request_id_key", &self.request_id_key),
        ];

        for (field, value) in names {
            if value.is_empty() {
                return Err(SessionError::InvalidConfig(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        let keys = [
            &self.identity_key,
            &self.connection_key,
            &self.message_key,
            &self.request_id_key,
        ];
        for (i, key) in keys.iter().enumerate() {
            if keys.iter().skip(i + 1).any(|other| other == key) {
                return Err(SessionError::InvalidConfig(format!(
                    "payload key {} is used twice",
                    key
                )));
            }
        }

        Ok(())
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Explicit host overriding the one discovery answered from.
    pub host: Option<String>,

    /// Heartbeat interval while the session is active.
    pub heartbeat_interval: Duration,

    /// Optional bound on the identity handshake (None = wait forever).
    pub handshake_timeout: Option<Duration>,

    /// Discovery status code meaning "resource exhausted".
    pub exhaustion_code: i64,

    /// Capacity of the notice broadcast channel.
    pub notice_capacity: usize,

    /// Capacity of the inbound business message channel.
    pub inbound_capacity: usize,

    /// Protocol event names and reserved keys.
    pub protocol: ProtocolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            handshake_timeout: None,
            exhaustion_code: DEFAULT_EXHAUSTION_CODE,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the explicit host override.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Bounds the identity handshake.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets the exhaustion status code.
    #[must_use]
    pub fn with_exhaustion_code(mut self, code: i64) -> Self {
        self.exhaustion_code = code;
        self
    }

    /// Sets the protocol names.
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.heartbeat_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "heartbeat_interval must be > 0".to_string(),
            ));
        }

        if self.handshake_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SessionError::InvalidConfig(
                "handshake_timeout must be > 0".to_string(),
            ));
        }

        if self.notice_capacity == 0 || self.inbound_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "channel capacities must be > 0".to_string(),
            ));
        }

        if self.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(SessionError::InvalidConfig(
                "host override cannot be empty".to_string(),
            ));
        }

        self.protocol.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert!(config.host.is_none());
        assert_eq!(
            config.heartbeat_interval,
            Duration::from_millis(DEFAULT_HEARTBEAT_MS)
        );
        assert!(config.handshake_timeout.is_none());
        assert_eq!(config.exhaustion_code, 2002);
        assert_eq!(config.protocol.request_id_key, "__request_id");
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .with_host("10.0.0.7")
            .with_heartbeat_interval(Duration::from_secs(1))
            .with_handshake_timeout(Duration::from_secs(5))
            .with_exhaustion_code(503);

        assert_eq!(config.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.exhaustion_code, 503);
    }

    #[test]
    fn test_config_validate_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_heartbeat() {
        let config = SessionConfig::new().with_heartbeat_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_empty_host() {
        let config = SessionConfig::new().with_host("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_protocol_validate_empty_name() {
        let protocol = ProtocolConfig {
            reset_event: String::new(),
            ..Default::default()
        };
        assert!(protocol.validate().is_err());
    }

    #[test]
    fn test_protocol_validate_key_collision() {
        let protocol = ProtocolConfig {
            request_id_key: "client_id".to_string(),
            ..Default::default()
        };
        let err = protocol.validate().err();
        assert_eq!(
            err,
            Some(SessionError::InvalidConfig(
                "payload key client_id is used twice".to_string()
            ))
        );
    }
}
