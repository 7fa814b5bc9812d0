//! Stdio transport setup for the MCP surface.
//!
//! Wires [`BridgeServer`] to stdin/stdout for direct invocation by agentic
//! IDEs and other MCP hosts.

use std::sync::Arc;

use rmcp::service::ServiceExt;
use rmcp::transport::io::stdio;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::{AppState, BridgeServer};
use crate::{BridgeError, Result};

/// Serve the MCP server over stdio until the cancellation token fires.
///
/// # Errors
///
/// Returns `BridgeError::Config` if the transport fails to initialize.
pub async fn serve_stdio(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let server = BridgeServer::new(state);
    let transport = stdio();

    info!("starting stdio MCP transport");
    let service = server
        .serve_with_ct(transport, ct)
        .await
        .map_err(|err| BridgeError::Config(format!("stdio transport failed: {err}")))?;

    service
        .waiting()
        .await
        .map_err(|err| BridgeError::Config(format!("stdio service error: {err}")))?;

    info!("stdio MCP transport shut down");
    Ok(())
}
