//! `repoql_import` MCP tool handler.
//!
//! Adds or removes an external source in the workspace index through the
//! child's `import` tool.  Imports block until the child finishes
//! indexing, so this tool runs with the longest timeout in the table.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info_span, Instrument};

use crate::server::handler::BridgeServer;
use crate::server::tools::util;

/// Input parameters for the import tool.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportInput {
    /// URI to import; a leading '-' removes the import instead.
    uri: String,
}

/// Handle the `repoql_import` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments fail validation.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let args: serde_json::Map<String, serde_json::Value> = context.arguments.unwrap_or_default();

    let input: ImportInput =
        serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
            rmcp::ErrorData::invalid_params(format!("invalid import parameters: {err}"), None)
        })?;
    let arguments = serde_json::to_value(&input).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode import arguments: {err}"), None)
    })?;

    let span = info_span!("repoql_import", uri = %input.uri);

    async move { Ok(util::proxy_call(&state, "import", arguments).await) }
        .instrument(span)
        .await
}
