//! Outbound messenger: wraps a query into a signed envelope and sends it.

use crate::error::BridgeResult;
use crate::payload::BridgePayload;
use agentlink_wire::MessagingNode;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Sends one query envelope per call. Fire-and-forget: the reply, if any,
/// arrives through the inbound listener.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    /// Deliver `query_text` tagged with `token` to `target`. Returns the
    /// envelope ID.
    async fn send(&self, target: &str, query_text: &str, token: &str) -> BridgeResult<String>;
}

/// [`OutboundMessenger`] over the agent network. Envelopes are signed with
/// the node's identity.
pub struct WireMessenger {
    node: Arc<MessagingNode>,
}

impl WireMessenger {
    pub fn new(node: Arc<MessagingNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl OutboundMessenger for WireMessenger {
    async fn send(&self, target: &str, query_text: &str, token: &str) -> BridgeResult<String> {
        let payload = BridgePayload::Query {
            token: token.to_string(),
            query_text: query_text.to_string(),
        }
        .to_value()?;
        let envelope_id = self.node.send(target, payload).await?;
        debug!(token = %token, envelope = %envelope_id, target = %target, "Query sent");
        Ok(envelope_id)
    }
}
