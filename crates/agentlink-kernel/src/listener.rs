//! Inbound listener: resolves pending calls from reply envelopes.
//!
//! Registered as the messaging node's [`EnvelopeHandler`]. Nothing an inbound
//! envelope carries can make it fail: bad payloads, strangers and stale
//! tokens are logged and dropped.

use crate::correlation::CorrelationTable;
use crate::error::{BridgeError, BridgeResult};
use crate::payload::BridgePayload;
use agentlink_wire::{Envelope, EnvelopeHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct InboundListener {
    table: Arc<CorrelationTable>,
    /// When set, envelopes from any other sender are dropped.
    expected_sender: Option<String>,
    resolved: AtomicU64,
    dropped: AtomicU64,
}

impl InboundListener {
    pub fn new(table: Arc<CorrelationTable>, expected_sender: Option<String>) -> Self {
        Self {
            table,
            expected_sender,
            resolved: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Match one envelope against the table. `Ok(false)` means the payload
    /// was fine but no call was waiting for it.
    pub fn process(&self, envelope: &Envelope) -> BridgeResult<bool> {
        if let Some(expected) = &self.expected_sender {
            if &envelope.sender != expected {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "unexpected sender {}",
                    envelope.sender
                )));
            }
        }

        let payload = BridgePayload::decode(&envelope.payload)?;
        let (token, outcome) = payload.into_outcome().ok_or_else(|| {
            BridgeError::MalformedEnvelope("bridge does not accept queries".to_string())
        })?;

        Ok(self.table.resolve(&token, outcome))
    }

    /// Replies that completed a waiting call.
    pub fn resolved_count(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    /// Envelopes dropped as malformed, unmatched or late.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EnvelopeHandler for InboundListener {
    async fn handle_envelope(&self, envelope: Envelope) {
        match self.process(&envelope) {
            Ok(true) => {
                self.resolved.fetch_add(1, Ordering::Relaxed);
                debug!(envelope = %envelope.id, "Reply matched a pending call");
            }
            Ok(false) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    envelope = %envelope.id,
                    sender = %envelope.sender,
                    "Reply token is unknown, expired or already resolved; dropped"
                );
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    envelope = %envelope.id,
                    sender = %envelope.sender,
                    error = %e,
                    "Dropped inbound envelope"
                );
            }
        }
    }
}
