//! Wire protocol message types.
//!
//! All communication between agents uses JSON-framed messages over TCP. Each
//! frame is prefixed with a 4-byte big-endian length header.

use agentlink_types::identity::{self, BridgeIdentity};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// An addressed, signed message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version the sender speaks.
    pub version: u32,
    /// Unique envelope ID.
    pub id: String,
    /// Sender agent address.
    pub sender: String,
    /// Target agent address.
    pub target: String,
    /// Session identifier, fresh per envelope unless the sender threads one.
    pub session: String,
    pub sent_at: DateTime<Utc>,
    /// Where the sender accepts envelopes, so the target can answer without
    /// a prior address book entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_endpoint: Option<String>,
    /// Application payload. Opaque to the wire layer.
    pub payload: serde_json::Value,
    /// Hex ed25519 signature over [`Envelope::signing_bytes`].
    #[serde(default)]
    pub signature: String,
}

impl Envelope {
    /// Create an unsigned envelope.
    pub fn new(sender: &str, target: &str, payload: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            target: target.to_string(),
            session: uuid::Uuid::new_v4().to_string(),
            sent_at: Utc::now(),
            reply_endpoint: None,
            payload,
            signature: String::new(),
        }
    }

    /// Canonical bytes covered by the signature. Every field except the
    /// signature itself participates.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = format!(
            "{}|{}|{}|{}|{}|{}|{}|",
            self.version,
            self.id,
            self.sender,
            self.target,
            self.session,
            self.sent_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.reply_endpoint.as_deref().unwrap_or(""),
        )
        .into_bytes();
        // serde_json::Value maps are key-ordered, so this is deterministic.
        bytes.extend_from_slice(self.payload.to_string().as_bytes());
        bytes
    }

    /// Sign with `identity`. The sender field is set to the identity's
    /// address first.
    pub fn sign(&mut self, identity: &BridgeIdentity) {
        self.sender = identity.address().to_string();
        self.signature = identity.sign(&self.signing_bytes());
    }

    /// Whether the signature is valid for the key embedded in `sender`.
    pub fn verify(&self) -> bool {
        identity::verify_signature(&self.sender, &self.signing_bytes(), &self.signature)
    }
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// An envelope for the receiving agent.
    Envelope(Envelope),
    /// Transport-level acknowledgement of an envelope.
    Ack {
        /// ID of the acknowledged envelope.
        id: String,
    },
    /// The receiver refused an envelope.
    Reject {
        /// ID of the refused envelope (empty if it could not be parsed).
        id: String,
        /// Rejection code (400 malformed, 401 bad signature, 404 wrong target,
        /// 503 not accepting).
        code: u16,
        message: String,
    },
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(frame)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a Frame.
pub fn decode_frame(body: &[u8]) -> Result<Frame, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: &str) -> BridgeIdentity {
        BridgeIdentity::from_seed(seed).unwrap()
    }

    #[test]
    fn test_frame_length_prefix() {
        let frame = Frame::Ack {
            id: "env-1".to_string(),
        };
        let bytes = encode_frame(&frame).unwrap();
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        assert_eq!(decode_frame(&bytes[4..]).unwrap(), frame);
    }

    #[test]
    fn test_signed_envelope_survives_the_wire() {
        let sender = identity("sender");
        let target = identity("target");
        let mut env = Envelope::new(
            "",
            target.address(),
            serde_json::json!({"type": "query", "token": "t-1", "query_text": "hi"}),
        );
        env.reply_endpoint = Some("127.0.0.1:8001".to_string());
        env.sign(&sender);
        assert_eq!(env.sender, sender.address());

        let bytes = encode_frame(&Frame::Envelope(env.clone())).unwrap();
        match decode_frame(&bytes[4..]).unwrap() {
            Frame::Envelope(decoded) => {
                assert_eq!(decoded, env);
                assert!(decoded.verify());
            }
            other => panic!("Expected Envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let sender = identity("sender");
        let mut env = Envelope::new("", "agent1target", serde_json::json!({"n": 1}));
        env.sign(&sender);

        let mut payload_changed = env.clone();
        payload_changed.payload = serde_json::json!({"n": 2});
        assert!(!payload_changed.verify());

        let mut redirected = env.clone();
        redirected.reply_endpoint = Some("10.0.0.1:1".to_string());
        assert!(!redirected.verify());

        let mut spoofed = env;
        spoofed.sender = identity("mallory").address().to_string();
        assert!(!spoofed.verify());
    }

    #[test]
    fn test_unsigned_envelope_fails_verification() {
        let env = Envelope::new(
            identity("a").address(),
            "agent1b",
            serde_json::Value::Null,
        );
        assert!(!env.verify());
    }

    #[test]
    fn test_reject_serialization() {
        let json = serde_json::to_string(&Frame::Reject {
            id: "e-1".to_string(),
            code: 401,
            message: "bad signature".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"reject\""));
        assert!(json.contains("401"));
    }
}
