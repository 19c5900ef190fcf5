//! Probe configuration.
//!
//! Loaded from `SWITCHBOARD_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_sdk::{DiscoveryConfig, SessionConfig, SessionError};

/// Discovery endpoint URL (required).
pub const ENV_DISCOVERY_URL: &str = "SWITCHBOARD_DISCOVERY_URL";
/// Host override for the socket.
pub const ENV_HOST: &str = "SWITCHBOARD_HOST";
/// Event name of the probe request.
pub const ENV_EVENT: &str = "SWITCHBOARD_EVENT";
/// JSON payload of the probe request.
pub const ENV_PAYLOAD: &str = "SWITCHBOARD_PAYLOAD";
/// Heartbeat interval in milliseconds.
pub const ENV_HEARTBEAT_MS: &str = "SWITCHBOARD_HEARTBEAT_MS";
/// Handshake timeout in milliseconds.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "SWITCHBOARD_HANDSHAKE_TIMEOUT_MS";

/// Configuration for the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Discovery endpoint URL.
    pub discovery_url: String,

    /// Socket host override.
    pub host: Option<String>,

    /// Event name of the probe request.
    pub event: String,

    /// Payload of the probe request.
    pub payload: Value,

    /// Heartbeat interval in milliseconds.
    pub heartbeat_ms: Option<u64>,

    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
}

impl ProbeConfig {
    /// Creates a configuration probing `discovery_url` with an empty `echo`.
    #[must_use]
    pub fn new(discovery_url: impl Into<String>) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            host: None,
            event: "echo".to_string(),
            payload: Value::Object(Default::default()),
            heartbeat_ms: None,
            handshake_timeout_ms: None,
        }
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is missing or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let discovery_url = lookup(ENV_DISCOVERY_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_DISCOVERY_URL))?;

        let mut config = Self::new(discovery_url);
        config.host = lookup(ENV_HOST).filter(|host| !host.trim().is_empty());

        if let Some(event) = lookup(ENV_EVENT).filter(|event| !event.is_empty()) {
            config.event = event;
        }

        if let Some(raw) = lookup(ENV_PAYLOAD) {
            config.payload = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::InvalidPayload(e.to_string()))?;
        }

        config.heartbeat_ms = parse_millis(&lookup, ENV_HEARTBEAT_MS)?;
        config.handshake_timeout_ms = parse_millis(&lookup, ENV_HANDSHAKE_TIMEOUT_MS)?;

        Ok(config)
    }

    /// Returns the discovery configuration.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::new(self.discovery_url.clone())
    }

    /// Returns the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::new();
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(ms) = self.heartbeat_ms {
            config = config.with_heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config = config.with_handshake_timeout(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidNumber { name, value: raw }),
        Ok(ms) => Ok(Some(ms)),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is not a positive number.
    #[error("{name} must be a positive number, got {value:?}")]
    InvalidNumber {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// The payload is not valid JSON.
    #[error("SWITCHBOARD_PAYLOAD is not valid JSON: {0}")]
    InvalidPayload(String),

    /// The session configuration is invalid.
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_config_minimal() {
        let config = ProbeConfig::from_lookup(lookup(&[(
            ENV_DISCOVERY_URL,
            "http://10.2.118.164:8080/port",
        )]))
        .expect("config");

        assert_eq!(config, ProbeConfig::new("http://10.2.118.164:8080/port"));
        assert_eq!(config.event, "echo");
        assert_eq!(config.payload, json!({}));
    }

    #[test]
    fn test_config_full() {
        let config = ProbeConfig::from_lookup(lookup(&[
            (ENV_DISCOVERY_URL, "http://127.0.0.1:8080/port"),
            (ENV_HOST, "https://gateway.example"),
            (ENV_EVENT, "ping"),
            (ENV_PAYLOAD, r#"{"x": 1}"#),
            (ENV_HEARTBEAT_MS, "1500"),
            (ENV_HANDSHAKE_TIMEOUT_MS, "10000"),
        ]))
        .expect("config");

        assert_eq!(config.host.as_deref(), Some("https://gateway.example"));
        assert_eq!(config.event, "ping");
        assert_eq!(config.payload, json!({"x": 1}));

        let session = tokio_test::assert_ok!(config.session_config());
        assert_eq!(session.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(session.handshake_timeout, Some(Duration::from_secs(10)));
        assert_eq!(session.host.as_deref(), Some("https://gateway.example"));
        assert_eq!(config.discovery_config().url, "http://127.0.0.1:8080/port");
    }

    #[test]
    fn test_config_missing_url() {
        let result = ProbeConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing(ENV_DISCOVERY_URL))));

        let result = ProbeConfig::from_lookup(lookup(&[(ENV_DISCOVERY_URL, "  ")]));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_config_invalid_numbers() {
        let result = ProbeConfig::from_lookup(lookup(&[
            (ENV_DISCOVERY_URL, "http://127.0.0.1:8080/port"),
            (ENV_HEARTBEAT_MS, "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber {
                name: ENV_HEARTBEAT_MS,
                ..
            })
        ));

        let result = ProbeConfig::from_lookup(lookup(&[
            (ENV_DISCOVERY_URL, "http://127.0.0.1:8080/port"),
            (ENV_HANDSHAKE_TIMEOUT_MS, "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidNumber { .. })));
    }

    #[test]
    fn test_config_invalid_payload() {
        let result = ProbeConfig::from_lookup(lookup(&[
            (ENV_DISCOVERY_URL, "http://127.0.0.1:8080/port"),
            (ENV_PAYLOAD, "{not json"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidPayload(_))));
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::Missing(ENV_DISCOVERY_URL).to_string(),
            "SWITCHBOARD_DISCOVERY_URL must be set"
        );
        assert_eq!(
            ConfigError::InvalidNumber {
                name: ENV_HEARTBEAT_MS,
                value: "x".to_string(),
            }
            .to_string(),
            "SWITCHBOARD_HEARTBEAT_MS must be a positive number, got \"x\""
        );
    }
}
