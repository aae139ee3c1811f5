//! Relay: one query in, one reply out.
//!
//! Per call: register a pending slot, send the query envelope, then wait on
//! the slot until the reply or the deadline. A failed send expires the slot
//! immediately. Calls share nothing but the correlation table, so one slow
//! agent reply never holds up another call.

use crate::correlation::CorrelationTable;
use crate::error::{BridgeError, BridgeResult};
use crate::messenger::OutboundMessenger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Relay {
    table: Arc<CorrelationTable>,
    messenger: Arc<dyn OutboundMessenger>,
    target: String,
    reply_timeout: Duration,
    draining: AtomicBool,
}

impl Relay {
    pub fn new(
        table: Arc<CorrelationTable>,
        messenger: Arc<dyn OutboundMessenger>,
        target: impl Into<String>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            table,
            messenger,
            target: target.into(),
            reply_timeout,
            draining: AtomicBool::new(false),
        }
    }

    /// Send `query_text` to the target agent and wait for its reply.
    pub async fn relay(&self, query_text: &str) -> BridgeResult<String> {
        if self.is_draining() {
            return Err(BridgeError::ShuttingDown);
        }

        let request = self.table.register(self.reply_timeout);
        let token = request.token().to_string();
        // A drain that started after the check above may already have swept
        // the table; this slot would then outlive it.
        if self.is_draining() {
            self.table.expire(&token);
            return Err(BridgeError::ShuttingDown);
        }
        debug!(token = %token, target = %self.target, "Dispatching query");

        if let Err(e) = self.messenger.send(&self.target, query_text, &token).await {
            self.table.expire(&token);
            warn!(token = %token, target = %self.target, error = %e, "Query send failed");
            return Err(e);
        }

        let result = self.table.await_result(request).await;
        match &result {
            Ok(_) => debug!(token = %token, "Query completed"),
            Err(BridgeError::Timeout(after)) => {
                warn!(token = %token, timeout = ?after, "Query timed out")
            }
            Err(e) => debug!(token = %token, error = %e, "Query failed"),
        }
        result
    }

    /// Refuse new calls from now on. In-flight calls are unaffected.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }
}
