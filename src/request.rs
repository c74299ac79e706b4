//! Request-id correlation for the editing service connection.
//!
//! Every outbound request gets a monotonically increasing id; the reader
//! task completes the matching pending slot when the response arrives.
//! Callbacks are oneshot channels, so a caller awaits exactly its own
//! response and a lost connection fails every pending request at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::protocol::{ProtocolError, WireMessage};

/// Correlates request ids with their response channels.
#[derive(Debug)]
pub struct RequestManager {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<WireMessage>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            // Id zero is reserved for notifications.
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending request, returning the channel its response
    /// will arrive on.
    pub async fn register(&self, request_id: u64) -> oneshot::Receiver<WireMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);
        rx
    }

    /// Route a response to its pending request. Returns false when no
    /// request with that id is waiting (already timed out, or a stray
    /// response).
    pub async fn complete(&self, request_id: u64, response: WireMessage) -> bool {
        let sender = self.pending.lock().await.remove(&request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                log::debug!("response for unknown request id {request_id}");
                false
            }
        }
    }

    /// Drop a pending request without completing it (caller gave up).
    pub async fn forget(&self, request_id: u64) {
        self.pending.lock().await.remove(&request_id);
    }

    /// Fail every pending request; their receivers observe a closed
    /// channel. Called when the connection is lost.
    pub async fn fail_all(&self) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            log::warn!("connection lost with {count} pending requests");
        }
    }

    /// Number of requests awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Await a registered response with a deadline.
    pub async fn wait(
        rx: oneshot::Receiver<WireMessage>,
        deadline: Duration,
    ) -> Result<WireMessage, ProtocolError> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }
}
