//! WebSocket frame format.
//!
//! Every text frame carries one named event: `{"event": "...", "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload (null when absent).
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Creates a new frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
