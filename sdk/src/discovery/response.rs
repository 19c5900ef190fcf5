//! Discovery response format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// Body of a discovery response.
///
/// Either `{"port": 9100}` or a status object such as
/// `{"port": {"data": null, "code": 2002, "message": "..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Where the socket listens, or why it cannot be reached.
    pub port: PortField,
}

/// The `port` field of a discovery response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    /// Plain port number.
    Number(u16),
    /// Port number sent as a string.
    Text(String),
    /// Status envelope.
    Status(PortStatus),
}

/// Status envelope carried in the `port` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortStatus {
    /// Port payload, null when no port was assigned.
    #[serde(default)]
    pub data: Option<Value>,
    /// Status code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Human readable message.
    #[serde(default)]
    pub message: Option<String>,
}

impl DiscoveryResponse {
    /// Creates a response announcing the given port.
    #[must_use]
    pub const fn with_port(port: u16) -> Self {
        Self {
            port: PortField::Number(port),
        }
    }

    /// Creates a response reporting exhaustion with the given code.
    #[must_use]
    pub fn exhausted(code: i64, message: impl Into<String>) -> Self {
        Self {
            port: PortField::Status(PortStatus {
                data: None,
                code: Some(code),
                message: Some(message.into()),
            }),
        }
    }

    /// Resolves the socket port.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ResourceExhausted`] when the status carries no
    /// data and the exhaustion code, and [`SessionError::MalformedDiscovery`]
    /// when no port can be read.
    pub fn port(&self, exhaustion_code: i64) -> Result<u16, SessionError> {
        match &self.port {
            PortField::Number(port) => Ok(*port),
            PortField::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| SessionError::MalformedDiscovery(format!("invalid port {:?}", text))),
            PortField::Status(status) => {
                let data = status.data.as_ref().filter(|d| !d.is_null());
                match (data, status.code) {
                    (None, Some(code)) if code == exhaustion_code => {
                        Err(SessionError::ResourceExhausted {
                            code,
                            message: status.message.clone(),
                        })
                    }
                    (Some(data), _) => port_from_value(data),
                    (None, code) => Err(SessionError::MalformedDiscovery(format!(
                        "no port assigned (code {:?}): {}",
                        code,
                        status.message.as_deref().unwrap_or("")
                    ))),
                }
            }
        }
    }
}

fn port_from_value(value: &Value) -> Result<u16, SessionError> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    port.ok_or_else(|| SessionError::MalformedDiscovery(format!("invalid port {}", value)))
}
