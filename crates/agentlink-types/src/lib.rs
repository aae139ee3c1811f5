//! Core types for the agentlink bridge.
//!
//! This crate defines the data structures shared by the messaging wire, the
//! bridge kernel and the RPC front door: configuration, the bridge's signing
//! identity, the A2A Agent Card and the configuration error taxonomy. It
//! opens no sockets.

pub mod card;
pub mod config;
pub mod error;
pub mod identity;

pub use card::{build_agent_card, AgentCapabilities, AgentCard, AgentSkill};
pub use config::{BridgeConfig, RawBridgeConfig};
pub use error::{ConfigError, ConfigResult};
pub use identity::{BridgeIdentity, SeedSource};
