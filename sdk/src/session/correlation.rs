//! Request/response correlation table.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::SessionError;

type Resolver = oneshot::Sender<Result<Value, SessionError>>;

/// Outstanding correlated requests, keyed by request id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, Resolver>>,
}

impl CorrelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request and returns its id with the receiving half of
    /// its resolution.
    pub async fn register(&self) -> (String, oneshot::Receiver<Result<Value, SessionError>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;

        let mut id = uuid::Uuid::new_v4().to_string();
        while pending.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }

        pending.insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolves the request with the given id.
    ///
    /// Returns false if no such request is pending. A request resolves at
    /// most once.
    pub async fn resolve(&self, id: &str, payload: Value) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(tx) => {
                // the caller may have given up already
                let _ = tx.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Forgets a request without resolving it.
    pub async fn discard(&self, id: &str) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Fails every pending request with `error` and returns how many there
    /// were.
    pub async fn fail_all(&self, error: SessionError) -> usize {
        let drained: Vec<Resolver> = self.pending.lock().await.drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Returns the number of pending requests.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Returns true if no request is pending.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
