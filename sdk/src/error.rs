//! Session error types.
//!
//! Provides the single error type shared by discovery, transports, sessions
//! and the module registry.

/// Session layer errors.
///
/// Errors are `Clone` so one teardown can fail every pending request with the
/// same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Endpoint discovery failed (network or HTTP error).
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Discovery answered with a body that does not describe an endpoint.
    #[error("malformed discovery response: {0}")]
    MalformedDiscovery(String),

    /// Discovery reported that the backend has no capacity left.
    #[error("resource exhausted [{code}]: {}", .message.as_deref().unwrap_or("no capacity"))]
    ResourceExhausted {
        /// Reserved status code reported by discovery.
        code: i64,
        /// Human readable reason, if the backend sent one.
        message: Option<String>,
    },

    /// Transport level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport has no live connection.
    #[error("not connected")]
    NotConnected,

    /// The session has not completed its handshake or is already torn down.
    #[error("session is not active")]
    NotActive,

    /// The session was closed while the operation was pending.
    #[error("session closed")]
    SessionClosed,

    /// The server invalidated the session identity.
    #[error("session reset by server")]
    Reset,

    /// The server did not assign an identity in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// A correlated request did not receive its response in time.
    #[error("request timed out")]
    Timeout,

    /// A module instance was replaced and lost its session affinity.
    #[error("module detached from session")]
    Detached,

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A module failed to construct or initialise.
    #[error("module {name} failed: {message}")]
    Module {
        /// Module name.
        name: String,
        /// Failure reason.
        message: String,
    },
}

impl SessionError {
    /// Returns true if the error means the session can no longer be used.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::Reset | Self::NotActive)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Discovery("request timeout".to_string())
        } else {
            Self::Discovery(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::Discovery("connection refused".to_string());
        assert_eq!(err.to_string(), "discovery failed: connection refused");

        let err = SessionError::Transport("broken pipe".to_string());
        assert_eq!(err.to_string(), "transport error: broken pipe");
    }

    #[test]
    fn test_error_resource_exhausted() {
        let err = SessionError::ResourceExhausted {
            code: 2002,
            message: Some("no free workers".to_string()),
        };
        assert_eq!(err.to_string(), "resource exhausted [2002]: no free workers");

        let err = SessionError::ResourceExhausted {
            code: 2002,
            message: None,
        };
        assert_eq!(err.to_string(), "resource exhausted [2002]: no capacity");
    }

    #[test]
    fn test_error_module() {
        let err = SessionError::Module {
            name: "Chat".to_string(),
            message: "missing room".to_string(),
        };
        assert_eq!(err.to_string(), "module Chat failed: missing room");
    }

    #[test]
    fn test_error_is_terminal() {
        assert!(SessionError::SessionClosed.is_terminal());
        assert!(SessionError::Reset.is_terminal());
        assert!(!SessionError::Timeout.is_terminal());
        assert!(!SessionError::Discovery(String::new()).is_terminal());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").err();
        assert!(json_err.is_some());
        if let Some(e) = json_err {
            assert!(matches!(SessionError::from(e), SessionError::Serialization(_)));
        }
    }
}
