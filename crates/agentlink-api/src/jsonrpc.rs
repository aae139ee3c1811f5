//! JSON-RPC 2.0 envelopes for the `query` method.
//!
//! Parsing works on raw bytes so each failure maps to its own error code
//! instead of a generic extractor rejection.

use agentlink_kernel::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// The only supported method.
pub const QUERY_METHOD: &str = "query";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TIMEOUT: i64 = -32001;
pub const AGENT_ERROR: i64 = -32002;
pub const SHUTTING_DOWN: i64 = -32003;

/// A validated `query` call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCall {
    pub id: Value,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, reply_text: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(serde_json::json!({ "reply_text": reply_text.into() })),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// Render a failed relay as an error response.
    pub fn from_bridge_error(id: Value, err: &BridgeError) -> Self {
        Self::error(id, error_code(err), err.to_string())
    }
}

/// JSON-RPC code for a per-call bridge error.
pub fn error_code(err: &BridgeError) -> i64 {
    match err {
        BridgeError::Timeout(_) => TIMEOUT,
        BridgeError::AgentError(_) => AGENT_ERROR,
        BridgeError::ShuttingDown => SHUTTING_DOWN,
        BridgeError::Send(_)
        | BridgeError::Config(_)
        | BridgeError::MalformedEnvelope(_)
        | BridgeError::Startup(_) => INTERNAL_ERROR,
    }
}

/// Validate a request body. On failure the ready-to-send error response is
/// returned, with `id` echoed whenever it could be read.
pub fn parse_query_call(body: &[u8]) -> Result<QueryCall, RpcResponse> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {e}")))?;

    let Value::Object(obj) = value else {
        return Err(RpcResponse::error(
            Value::Null,
            INVALID_REQUEST,
            "Invalid request: expected a JSON object",
        ));
    };
    let id = obj.get("id").cloned().unwrap_or(Value::Null);

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.as_str(),
        Some(_) => {
            return Err(RpcResponse::error(
                id,
                PARSE_ERROR,
                "Parse error: method must be a string",
            ))
        }
        None => {
            return Err(RpcResponse::error(
                id,
                PARSE_ERROR,
                "Parse error: missing method",
            ))
        }
    };
    if method != QUERY_METHOD {
        return Err(RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        ));
    }

    let query = obj
        .get("params")
        .and_then(|p| p.get("query"))
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty());
    match query {
        Some(q) => Ok(QueryCall {
            id,
            query: q.to_string(),
        }),
        None => Err(RpcResponse::error(
            id,
            INVALID_PARAMS,
            "Invalid params: params.query must be a non-empty string",
        )),
    }
}
