//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Connecting -> AwaitingIdentity -> Active -> (Reset | Closed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The transport is opening.
    Connecting,
    /// Connected, waiting for the server to assign an identity.
    AwaitingIdentity,
    /// Identity installed; requests and heartbeats flow.
    Active,
    /// The server invalidated the identity.
    Reset,
    /// The transport is closed.
    Closed,
}

impl SessionState {
    /// Returns true for states a session never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Reset | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingIdentity => write!(f, "awaiting_identity"),
            Self::Active => write!(f, "active"),
            Self::Reset => write!(f, "reset"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::AwaitingIdentity.to_string(), "awaiting_identity");
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Reset.to_string(), "reset");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_state_terminal() {
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::AwaitingIdentity.is_terminal());
        assert!(SessionState::Reset.is_terminal());
        assert!(SessionState::Closed.is_terminal());
    }
}
