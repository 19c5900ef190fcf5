//! Inbound server events.
//!
//! Named transport messages are classified once into [`ServerEvent`] so the
//! session dispatches over a closed set of variants.

use serde_json::Value;

use crate::config::{ProtocolConfig, FALLBACK_RESPONSE_ID_KEY};

/// A server event the session understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The server assigned the session identity.
    IdentityAssigned(String),
    /// The identity event carried no usable value.
    InvalidIdentity(Value),
    /// The server invalidated the session identity.
    Reset,
    /// An application error to show to the user.
    ApplicationError(String),
    /// The response to a correlated request.
    Response {
        /// Request id.
        id: String,
        /// Full response payload.
        payload: Value,
    },
    /// A response without a request id.
    UnmatchedResponse(Value),
    /// Any other event, left to business code.
    Other {
        /// Event name.
        event: String,
        /// Event payload.
        payload: Value,
    },
}

impl ServerEvent {
    /// Classifies a named message.
    #[must_use]
    pub fn classify(protocol: &ProtocolConfig, event: String, payload: Value) -> Self {
        if event == protocol.identity_event {
            return match payload {
                Value::String(identity) if !identity.is_empty() => Self::IdentityAssigned(identity),
                Value::Number(n) => Self::IdentityAssigned(n.to_string()),
                other => Self::InvalidIdentity(other),
            };
        }

        if event == protocol.reset_event {
            return Self::Reset;
        }

        if event == protocol.error_event {
            let message = match payload.get("error") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => payload.to_string(),
            };
            return Self::ApplicationError(message);
        }

        if event == protocol.response_event {
            let id = [protocol.request_id_key.as_str(), FALLBACK_RESPONSE_ID_KEY]
                .iter()
                .find_map(|key| payload.get(*key).and_then(Value::as_str))
                .map(String::from);
            return match id {
                Some(id) => Self::Response { id, payload },
                None => Self::UnmatchedResponse(payload),
            };
        }

        Self::Other { event, payload }
    }
}
