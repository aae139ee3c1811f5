//! Bridge payloads carried inside wire envelopes.

use crate::correlation::ReplyOutcome;
use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Payload of a bridge envelope, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgePayload {
    /// Bridge -> agent.
    Query { token: String, query_text: String },
    /// Agent -> bridge, success.
    Reply { token: String, reply_text: String },
    /// Agent -> bridge, failure.
    Error { token: String, error_text: String },
}

impl BridgePayload {
    pub fn token(&self) -> &str {
        match self {
            Self::Query { token, .. } | Self::Reply { token, .. } | Self::Error { token, .. } => {
                token
            }
        }
    }

    pub fn to_value(&self) -> BridgeResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))
    }

    /// Decode an envelope payload. Unknown types, missing fields and empty
    /// tokens are all malformed.
    pub fn decode(value: &serde_json::Value) -> BridgeResult<Self> {
        let payload: Self = serde_json::from_value(value.clone())
            .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;
        if payload.token().trim().is_empty() {
            return Err(BridgeError::MalformedEnvelope("empty token".to_string()));
        }
        Ok(payload)
    }

    /// Split a reply or error payload into its token and outcome. Queries
    /// have no outcome.
    pub fn into_outcome(self) -> Option<(String, ReplyOutcome)> {
        match self {
            Self::Query { .. } => None,
            Self::Reply { token, reply_text } => Some((token, ReplyOutcome::Reply(reply_text))),
            Self::Error { token, error_text } => Some((token, ReplyOutcome::Failure(error_text))),
        }
    }
}
