//! Pending request table.
//!
//! Every reply-expecting control message registers a single-use slot keyed
//! by its correlation ID before it is queued. Exactly one of three things
//! retires a slot: the matching reply, a session failure, or the caller
//! abandoning it after a timeout. The lock is only held for map mutation,
//! never while anyone waits.

use super::message::ControlReply;
use crate::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) type ReplyResult = Result<ControlReply>;

struct PendingEntry {
    tx: oneshot::Sender<ReplyResult>,
    /// Session epoch the request was written in; `None` while still queued.
    sent_in: Option<u64>,
}

/// Correlation ID → waiter map shared by all callers of one client.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `correlation` and return its receiving end.
    pub fn register(&self, correlation: &str) -> oneshot::Receiver<ReplyResult> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .entries()
            .insert(correlation.to_string(), PendingEntry { tx, sent_in: None });
        if let Some(previous) = previous {
            warn!(correlation, "correlation ID reused; failing the older waiter");
            let _ = previous
                .tx
                .send(Err(BridgeError::transport("correlation ID reused")));
        }
        rx
    }

    /// Record that the request went out in session `epoch`.
    ///
    /// Returns `false` when the waiter is gone (timed out), in which case the
    /// message should not be written at all.
    pub fn mark_sent(&self, correlation: &str, epoch: u64) -> bool {
        match self.entries().get_mut(correlation) {
            Some(entry) => {
                entry.sent_in = Some(epoch);
                true
            }
            None => false,
        }
    }

    /// Deliver a reply to its waiter. Returns `false` for unmatched replies.
    pub fn resolve(&self, reply: ControlReply) -> bool {
        let entry = self.entries().remove(&reply.correlation);
        match entry {
            Some(entry) => {
                let correlation = reply.correlation.clone();
                if entry.tx.send(Ok(reply)).is_err() {
                    debug!(correlation = %correlation, "waiter dropped before its reply arrived");
                }
                true
            }
            None => false,
        }
    }

    /// Fail one waiter with `err`. Returns `false` when nobody is waiting.
    pub fn fail(&self, correlation: &str, err: BridgeError) -> bool {
        match self.entries().remove(correlation) {
            Some(entry) => {
                let _ = entry.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Remove a waiter without resolving it. Used by a caller that timed out.
    pub fn abandon(&self, correlation: &str) -> bool {
        self.entries().remove(correlation).is_some()
    }

    /// Fail every request written during session `epoch`.
    pub fn fail_session(&self, epoch: u64, message: &str) -> usize {
        let failed: Vec<PendingEntry> = {
            let mut entries = self.entries();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.sent_in == Some(epoch))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        Self::fail_entries(failed, message)
    }

    /// Fail every outstanding request, queued or written.
    pub fn fail_all(&self, message: &str) -> usize {
        let failed: Vec<PendingEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        Self::fail_entries(failed, message)
    }

    fn fail_entries(entries: Vec<PendingEntry>, message: &str) -> usize {
        let count = entries.len();
        for entry in entries {
            let _ = entry.tx.send(Err(BridgeError::transport(message)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
