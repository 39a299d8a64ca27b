use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use arbor_core::errors::ForwardError;
use arbor_core::ids::RequestId;

use crate::peer::PeerKey;

/// Reply extracted from a peer's JSON-RPC response frame.
#[derive(Clone, Debug, Default)]
pub struct PeerReply {
    pub result: Option<Value>,
    pub error: Option<Value>,
}

/// What the originator of a forward eventually receives. Exactly one per id.
pub type ForwardOutcome = Result<PeerReply, ForwardError>;

struct PendingEntry {
    /// Operation label used in the timeout message, e.g. `Operation get_tree`.
    label: String,
    target: PeerKey,
    reply_tx: oneshot::Sender<ForwardOutcome>,
    timer: tokio::task::JoinHandle<()>,
}

/// Maps in-flight forward ids to their waiters. Safe for concurrent
/// insert/remove/lookup; every entry is removed by exactly one of:
/// a matching reply, deadline expiry, peer disconnect, or shutdown.
#[derive(Default)]
pub struct CorrelationTable {
    entries: DashMap<RequestId, PendingEntry>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a pending forward and schedule its deadline. The returned
    /// receiver resolves with the terminal outcome.
    pub fn insert(
        self: &Arc<Self>,
        id: RequestId,
        label: impl Into<String>,
        target: PeerKey,
        deadline: Duration,
    ) -> oneshot::Receiver<ForwardOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let table = Arc::clone(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            table.expire(&timer_id, deadline);
        });

        self.entries.insert(
            id,
            PendingEntry {
                label: label.into(),
                target,
                reply_tx,
                timer,
            },
        );
        reply_rx
    }

    /// Deliver a peer reply. Returns `false` for orphan ids (already
    /// satisfied, expired, or never issued); the caller logs and drops.
    pub fn satisfy(&self, id: &RequestId, reply: PeerReply) -> bool {
        let Some((_, entry)) = self.entries.remove(id) else {
            return false;
        };
        entry.timer.abort();
        let _ = entry.reply_tx.send(Ok(reply));
        true
    }

    fn expire(&self, id: &RequestId, deadline: Duration) {
        let Some((_, entry)) = self.entries.remove(id) else {
            return;
        };
        tracing::warn!(id = %id, label = %entry.label, "Forward deadline expired");
        let _ = entry.reply_tx.send(Err(ForwardError::timeout(
            entry.label,
            deadline.as_millis() as u64,
        )));
    }

    /// Withdraw an entry whose request frame could not be delivered.
    /// The waiter's receiver is dropped by the caller; nothing is sent.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending forward targeting a disconnected peer.
    /// Each waiter receives a peer-disconnect error.
    pub fn cancel_for_peer(&self, key: &PeerKey) -> usize {
        let ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|e| e.value().target == *key)
            .map(|e| e.key().clone())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.timer.abort();
                let _ = entry.reply_tx.send(Err(ForwardError::PeerDisconnected));
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Shutdown: fail every remaining waiter and cancel its timer.
    pub fn drain_all(&self) -> usize {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.timer.abort();
                let _ = entry.reply_tx.send(Err(ForwardError::Cancelled));
                drained += 1;
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }
}
