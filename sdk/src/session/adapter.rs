//! Outbound payload stamping.
//!
//! Every payload leaving an active session carries the session identity, so
//! the server can match it to its bookkeeping without each caller attaching
//! it by hand.

use serde_json::{Map, Value};

use crate::config::ProtocolConfig;

/// Stamps `payload` with the session identity.
///
/// Objects get the identity key set in place (a caller value under the same
/// key is overwritten). Anything else is wrapped as
/// `{message, identity, connection id}`.
#[must_use]
pub fn stamp(
    payload: Value,
    identity: &str,
    connection_id: Option<&str>,
    protocol: &ProtocolConfig,
) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert(
                protocol.identity_key.clone(),
                Value::String(identity.to_string()),
            );
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert(protocol.message_key.clone(), other);
            map.insert(
                protocol.identity_key.clone(),
                Value::String(identity.to_string()),
            );
            map.insert(
                protocol.connection_key.clone(),
                connection_id.map_or(Value::Null, |id| Value::String(id.to_string())),
            );
            Value::Object(map)
        }
    }
}

/// Inserts a request id under the reserved key, wrapping non-object payloads
/// under the message key first.
#[must_use]
pub fn with_request_id(payload: Value, request_id: &str, protocol: &ProtocolConfig) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(protocol.message_key.clone(), other);
            map
        }
    };
    map.insert(
        protocol.request_id_key.clone(),
        Value::String(request_id.to_string()),
    );
    Value::Object(map)
}
