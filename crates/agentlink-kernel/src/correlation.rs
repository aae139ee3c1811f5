//! Correlation table: pending-reply slots keyed by correlation token.
//!
//! Each in-flight RPC call owns exactly one [`PendingRequest`]: the receiving
//! half of a single-use channel plus its deadline. The table keeps the sending
//! half. Resolution, timeout eviction and forced expiry all go through a
//! single `remove` on the concurrent map, so for any token exactly one of them
//! wins and the rest are no-ops.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// What the remote agent sent back for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Successful reply text.
    Reply(String),
    /// The agent reported an error.
    Failure(String),
}

struct PendingSlot {
    deadline: Instant,
    tx: oneshot::Sender<ReplyOutcome>,
}

/// The caller's side of a registered call. Not clonable: one reader per token.
#[derive(Debug)]
pub struct PendingRequest {
    token: String,
    created_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<ReplyOutcome>,
}

impl PendingRequest {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Concurrent map from token to pending-reply slot.
pub struct CorrelationTable {
    pending: DashMap<String, PendingSlot>,
    /// Monotonic sequence folded into every token so none is ever reissued.
    next_seq: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh token with a slot that expires after `timeout`.
    pub fn register(&self, timeout: Duration) -> PendingRequest {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = format!("{seq:x}-{}", uuid::Uuid::new_v4().simple());
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (tx, rx) = oneshot::channel();

        self.pending
            .insert(token.clone(), PendingSlot { deadline, tx });

        PendingRequest {
            token,
            created_at,
            deadline,
            rx,
        }
    }

    /// Deliver an outcome. Returns `false` for unknown, already resolved or
    /// expired tokens, and when the caller has already given up.
    pub fn resolve(&self, token: &str, outcome: ReplyOutcome) -> bool {
        let Some((_, slot)) = self.pending.remove(token) else {
            return false;
        };
        if slot.deadline <= Instant::now() {
            debug!(token = %token, "Reply arrived after the deadline");
            return false;
        }
        slot.tx.send(outcome).is_ok()
    }

    /// Wait for the outcome of `request` until its deadline.
    ///
    /// On timeout the entry is evicted, so a later `resolve` is a no-op. A
    /// slot expired by [`expire`](Self::expire), the sweeper or shutdown also
    /// ends as [`BridgeError::Timeout`].
    pub async fn await_result(&self, request: PendingRequest) -> BridgeResult<String> {
        let PendingRequest {
            token,
            created_at,
            deadline,
            mut rx,
        } = request;
        let waited = deadline.saturating_duration_since(created_at);

        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Sender dropped: the slot was expired out from under us.
                self.pending.remove(&token);
                return Err(BridgeError::Timeout(waited));
            }
            Err(_) => {
                self.pending.remove(&token);
                // A resolver that removed the slot just before us may still
                // be sending; closing first makes that send fail cleanly.
                rx.close();
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(BridgeError::Timeout(waited)),
                }
            }
        };

        match outcome {
            ReplyOutcome::Reply(text) => Ok(text),
            ReplyOutcome::Failure(error) => Err(BridgeError::AgentError(error)),
        }
    }

    /// Drop the slot for `token`; its waiter ends with a timeout.
    pub fn expire(&self, token: &str) -> bool {
        self.pending.remove(token).is_some()
    }

    /// Expire every pending slot. Returns how many were dropped.
    pub fn expire_all(&self) -> usize {
        let mut expired = 0;
        self.pending.retain(|_, _| {
            expired += 1;
            false
        });
        expired
    }

    /// Evict slots whose deadline is at or before `now`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut swept = 0;
        self.pending.retain(|_, slot| {
            let keep = slot.deadline > now;
            if !keep {
                swept += 1;
            }
            keep
        });
        swept
    }

    pub fn contains(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    /// Number of tokens issued since creation.
    pub fn issued(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed) - 1
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
