//! User-facing notices.
//!
//! Most failures are only logged. Resource exhaustion and server-pushed
//! application errors are meant for the end user and are broadcast here.

use std::fmt;

use tokio::sync::broadcast;

/// A notice meant for the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Discovery reported that the backend has no capacity left.
    ResourceExhausted {
        /// Reserved status code.
        code: i64,
        /// Reason sent by the backend.
        message: Option<String>,
    },
    /// The server pushed an application error.
    ApplicationError {
        /// Error text.
        message: String,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { message, .. } => write!(
                f,
                "{}",
                message.as_deref().unwrap_or("no capacity left, try again later")
            ),
            Self::ApplicationError { message } => write!(f, "socket error: {}", message),
        }
    }
}

/// Broadcast hub for [`Notice`]s.
#[derive(Debug, Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Notices {
    /// Creates a hub buffering up to `capacity` notices per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to notices published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Publishes a notice. Returns how many subscribers received it.
    pub fn publish(&self, notice: Notice) -> usize {
        self.tx.send(notice).unwrap_or(0)
    }
}
