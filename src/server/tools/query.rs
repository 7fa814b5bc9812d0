//! `repoql_query` MCP tool handler.
//!
//! Read-only SQL over the workspace index, proxied to the child's `query`
//! tool.  Runs with a longer default timeout than the other interactive
//! tools.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info_span, Instrument};

use crate::server::handler::BridgeServer;
use crate::server::tools::util;

/// Input parameters for the query tool.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryInput {
    /// SQL statement to run.
    sql: String,
    /// Optional response token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_budget: Option<u64>,
}

/// Handle the `repoql_query` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments fail validation.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let args: serde_json::Map<String, serde_json::Value> = context.arguments.unwrap_or_default();

    let input: QueryInput =
        serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
            rmcp::ErrorData::invalid_params(format!("invalid query parameters: {err}"), None)
        })?;
    let arguments = serde_json::to_value(&input).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode query arguments: {err}"), None)
    })?;

    let span = info_span!("repoql_query", sql_len = input.sql.len());

    async move { Ok(util::proxy_call(&state, "query", arguments).await) }
        .instrument(span)
        .await
}
