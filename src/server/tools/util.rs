//! Shared plumbing for MCP tool handlers.

use rmcp::model::{CallToolResult, Content};
use tracing::warn;

use crate::rpc::ToolOutcome;
use crate::server::handler::AppState;
use crate::BridgeError;

/// Proxy one tool invocation to the workspace's RepoQL instance.
///
/// Supervision failures and RPC errors are not protocol errors; they come
/// back as an error-flagged tool result so the caller sees what went wrong.
pub async fn proxy_call(
    state: &AppState,
    tool: &str,
    arguments: serde_json::Value,
) -> CallToolResult {
    let client = match state.registry.get_instance(&state.workspace_root).await {
        Ok(client) => client,
        Err(err) => {
            warn!(tool, %err, "no instance available for tool call");
            return failure_result(&err);
        }
    };

    let timeout = state.config.tool_timeout(tool);
    match client.call_tool(tool, arguments, timeout).await {
        Ok(outcome) => success_result(outcome),
        Err(err) => {
            warn!(tool, %err, "tool call failed");
            failure_result(&err)
        }
    }
}

/// Convert a child tool outcome into the result returned to the host.
#[must_use]
pub fn success_result(outcome: ToolOutcome) -> CallToolResult {
    let content: Vec<Content> = outcome
        .content
        .into_iter()
        .map(content_from_value)
        .collect();
    if outcome.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

/// Render a bridge error as an error-flagged tool result.
#[must_use]
pub fn failure_result(err: &BridgeError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "RepoQL error: {}",
        err.user_message()
    ))])
}

/// Map one raw content item onto an rmcp content value.
fn content_from_value(item: serde_json::Value) -> Content {
    if item.get("type").and_then(serde_json::Value::as_str) == Some("text") {
        if let Some(text) = item.get("text").and_then(serde_json::Value::as_str) {
            return Content::text(text.to_owned());
        }
    }
    // Unknown content kinds survive as their JSON form.
    let raw = item.to_string();
    Content::json(item).unwrap_or_else(|_| Content::text(raw))
}
