//! JSON-RPC 2.0 stdio plumbing for RepoQL child processes.
//!
//! One [`RpcClient`] owns one child process for its whole life: spawn,
//! handshake, request correlation, and termination. Messages travel as
//! newline-delimited JSON over the child's stdin/stdout.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: wire envelopes, MCP handshake parameters, and inbound
//!   classification.
//! - `client`: the single-use client with its reader and supervisor tasks.

pub mod client;
pub mod codec;
pub mod message;

pub use client::{ExitEvent, RpcClient, RpcClientOptions};
pub use message::ToolOutcome;
