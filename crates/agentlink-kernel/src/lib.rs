//! Bridge kernel: turns one synchronous query into one addressed envelope
//! and back.
//!
//! - [`correlation`]: pending-reply slots keyed by correlation token
//! - [`messenger`]: outbound query envelopes
//! - [`listener`]: inbound reply envelopes
//! - [`relay`]: the per-call dispatch/await sequence
//! - [`kernel`]: boots and stops the messaging side
//! - [`shutdown`]: ordered teardown bookkeeping

pub mod correlation;
pub mod error;
pub mod kernel;
pub mod listener;
pub mod messenger;
pub mod payload;
pub mod relay;
pub mod shutdown;

pub use correlation::{CorrelationTable, PendingRequest, ReplyOutcome};
pub use error::{BridgeError, BridgeResult};
pub use kernel::BridgeKernel;
pub use listener::InboundListener;
pub use messenger::{OutboundMessenger, WireMessenger};
pub use payload::BridgePayload;
pub use relay::Relay;
pub use shutdown::{PhaseLog, ShutdownCoordinator, ShutdownPhase, ShutdownStatus};
