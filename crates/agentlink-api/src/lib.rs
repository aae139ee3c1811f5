//! RPC front door for the agentlink bridge.
//!
//! Exposes the bridge over JSON-RPC on HTTP: `POST /` takes a `query` call
//! and answers with the remote agent's reply, `GET /.well-known/agent.json`
//! serves the A2A Agent Card and `GET /health` reports liveness. The server
//! module owns startup and the ordered shutdown of both listeners.

pub mod jsonrpc;
pub mod routes;
pub mod server;

pub use jsonrpc::{QueryCall, RpcError, RpcResponse};
pub use server::{build_router, run_bridge, shutdown_signal, BridgeServer, RunningBridge};
