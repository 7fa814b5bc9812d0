//! JSON-RPC 2.0 wire shapes for the RepoQL stdio protocol.
//!
//! Outbound traffic is built with [`request`], [`notification`], and the
//! MCP-specific parameter constructors.  Inbound lines are classified by
//! [`parse_inbound_line`]: responses are surfaced with their correlation id,
//! everything else (notifications, server-initiated requests, responses with
//! unusable ids) is dropped.

use tracing::debug;

use crate::{BridgeError, Result};

/// MCP protocol revision sent during the `initialize` handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Subcommand that puts the RepoQL executable into stdio server mode.
pub const MCP_SUBCOMMAND: &str = "mcp";

/// Client name advertised in the `initialize` request.
pub const CLIENT_NAME: &str = "repoql-bridge";

/// Method name of the handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Method name of the post-handshake notification.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Method name for tool invocations.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

// ── Outbound construction ─────────────────────────────────────────────────────

/// Build a JSON-RPC request envelope.
#[must_use]
pub fn request(id: u64, method: &str, params: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a JSON-RPC notification envelope (no id, no reply expected).
#[must_use]
pub fn notification(method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {},
    })
}

/// Parameters for the MCP `initialize` request.
#[must_use]
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Parameters for a `tools/call` request.
#[must_use]
pub fn tool_call_params(name: &str, arguments: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "arguments": arguments,
    })
}

// ── Inbound classification ────────────────────────────────────────────────────

/// A correlated response extracted from one inbound line.
#[derive(Debug)]
pub struct RpcResponse {
    /// Request id the response belongs to.
    pub id: u64,
    /// Success payload or the child's JSON-RPC error.
    pub outcome: Result<serde_json::Value>,
}

/// Classify one inbound NDJSON line.
///
/// Returns `Ok(Some(_))` for a response carrying a numeric id, `Ok(None)`
/// for traffic that requires no routing: empty lines, notifications and
/// server-initiated requests (anything with a `method` member), and
/// responses whose id is absent or not an unsigned integer.
///
/// # Errors
///
/// Returns [`BridgeError::Protocol`] when the line is not valid JSON.  The
/// caller logs and skips such lines; the stream itself stays usable.
pub fn parse_inbound_line(line: &str) -> Result<Option<RpcResponse>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| BridgeError::Protocol(format!("malformed json: {e}")))?;

    if let Some(method) = value.get("method").and_then(serde_json::Value::as_str) {
        debug!(%method, "ignoring non-response traffic from child");
        return Ok(None);
    }

    let Some(id) = value.get("id").and_then(serde_json::Value::as_u64) else {
        debug!("dropping response without a usable numeric id");
        return Ok(None);
    };

    if let Some(error) = value.get("error") {
        let code = error
            .get("code")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default();
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        let data = error.get("data").cloned();
        return Ok(Some(RpcResponse {
            id,
            outcome: Err(BridgeError::Rpc {
                code,
                message,
                data,
            }),
        }));
    }

    let result = value
        .get("result")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    Ok(Some(RpcResponse {
        id,
        outcome: Ok(result),
    }))
}

// ── Tool results ──────────────────────────────────────────────────────────────

/// Result payload of a `tools/call` round trip.
///
/// Content items are kept as raw JSON so unknown content types pass through
/// the bridge untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ToolOutcome {
    /// Content items exactly as produced by the child.
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    /// Whether the child flagged this result as an error.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutcome {
    /// Parse a raw `tools/call` result value.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] when the value is not an object in
    /// the tool-result shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("unexpected tool result shape: {e}")))
    }
}
