//! Route handlers for the RPC front door.

use crate::jsonrpc::{parse_query_call, RpcResponse};
use agentlink_kernel::{BridgeKernel, Relay};
use agentlink_types::AgentCard;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Shared state for all handlers.
pub struct AppState {
    pub relay: Arc<Relay>,
    pub card: AgentCard,
    /// Address of the remote agent every query goes to.
    pub agent_address: String,
    /// The bridge's own network address.
    pub bridge_address: String,
}

impl AppState {
    pub fn from_kernel(kernel: &BridgeKernel, card: AgentCard) -> Self {
        Self {
            relay: Arc::clone(kernel.relay()),
            card,
            agent_address: kernel.config().target_agent_address.clone(),
            bridge_address: kernel.address().to_string(),
        }
    }
}

/// POST /: JSON-RPC `query`.
///
/// Always answers 200; failures travel in the JSON-RPC `error` member.
pub async fn rpc(State(state): State<Arc<AppState>>, body: Bytes) -> Json<RpcResponse> {
    let call = match parse_query_call(&body) {
        Ok(call) => call,
        Err(response) => {
            debug!(
                code = response.error.as_ref().map(|e| e.code),
                "Rejected RPC request"
            );
            return Json(response);
        }
    };

    match state.relay.relay(&call.query).await {
        Ok(reply_text) => Json(RpcResponse::success(call.id, reply_text)),
        Err(e) => Json(RpcResponse::from_bridge_error(call.id, &e)),
    }
}

/// GET /.well-known/agent.json
pub async fn agent_card(State(state): State<Arc<AppState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.relay.is_draining() {
        "draining"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "agent_address": state.agent_address,
        "bridge_address": state.bridge_address,
        "pending": state.relay.correlation().len(),
    }))
}
