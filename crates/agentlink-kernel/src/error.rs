//! Kernel error taxonomy.

use agentlink_types::ConfigError;
use agentlink_wire::WireError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the bridge core.
///
/// Only `Config` and `Startup` are process-fatal; everything else is local to
/// one call or one inbound envelope.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid configuration or identity, surfaced before startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The query envelope could not be delivered.
    #[error("Send failed: {0}")]
    Send(#[from] WireError),

    /// No reply arrived before the deadline.
    #[error("No reply from agent within {0:?}")]
    Timeout(Duration),

    /// The remote agent answered with an error.
    #[error("Agent error: {0}")]
    AgentError(String),

    /// An inbound envelope did not carry a usable bridge payload.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The bridge is draining and no longer accepts calls.
    #[error("Bridge is shutting down")]
    ShuttingDown,

    /// A listener failed to start.
    #[error("Startup failed: {0}")]
    Startup(String),
}

/// Alias for kernel results.
pub type BridgeResult<T> = Result<T, BridgeError>;
