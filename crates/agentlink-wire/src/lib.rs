//! Agent network wire protocol: addressed, signed envelopes over TCP.
//!
//! Every agent on the network has a stable address derived from its ed25519
//! key. Agents exchange [`Envelope`]s: one-way, signed messages delivered to
//! the target's endpoint and acknowledged at the transport level only. Any
//! reply is a separate envelope travelling the other way.
//!
//! ## Architecture
//!
//! - **MessagingNode**: binds a listener, verifies and acknowledges inbound
//!   envelopes, and sends signed envelopes to other agents
//! - **AddressBook**: resolves agent addresses to socket endpoints
//! - **Envelope / Frame**: JSON-framed protocol messages
//! - **EnvelopeHandler**: trait the application implements to consume
//!   verified inbound envelopes

pub mod address_book;
pub mod message;
pub mod node;

pub use address_book::{AddressBook, AddressEntry, EndpointSource, MAX_LEARNED_ENTRIES};
pub use message::{Envelope, Frame, PROTOCOL_VERSION};
pub use node::{EnvelopeHandler, MessagingNode, NodeConfig, WireError};
