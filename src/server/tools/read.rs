//! `repoql_read` MCP tool handler.
//!
//! Budgeted reads of indexed files and globs, proxied to the child's
//! `read` tool.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info_span, Instrument};

use crate::server::handler::BridgeServer;
use crate::server::tools::util;

/// Input parameters for the read tool.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadInput {
    /// URI or glob to read.
    uri: String,
    /// Response token budget.
    token_budget: u64,
}

/// Handle the `repoql_read` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments fail validation.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let args: serde_json::Map<String, serde_json::Value> = context.arguments.unwrap_or_default();

    let input: ReadInput =
        serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
            rmcp::ErrorData::invalid_params(format!("invalid read parameters: {err}"), None)
        })?;
    let arguments = serde_json::to_value(&input).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode read arguments: {err}"), None)
    })?;

    let span = info_span!(
        "repoql_read",
        uri = %input.uri,
        token_budget = input.token_budget,
    );

    async move { Ok(util::proxy_call(&state, "read", arguments).await) }
        .instrument(span)
        .await
}
