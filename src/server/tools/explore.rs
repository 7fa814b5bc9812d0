//! `repoql_explore` MCP tool handler.
//!
//! Relevance-ranked exploration of the workspace index, proxied to the
//! child's `explore` tool.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info_span, Instrument};

use crate::server::handler::BridgeServer;
use crate::server::tools::util;

/// Input parameters for the explore tool.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExploreInput {
    /// Knowledge state driving the ranking.
    intent: String,
    /// Tokens to invest in the response.
    token_budget: u64,
    /// Optional URI glob filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri_glob: Option<String>,
    /// Optional search terms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keywords: Option<String>,
    /// Optional boost regex patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    boost: Option<String>,
    /// Optional demotion regex patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    penalize: Option<String>,
    /// Optional result cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

/// Handle the `repoql_explore` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments fail validation.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let args: serde_json::Map<String, serde_json::Value> = context.arguments.unwrap_or_default();

    let input: ExploreInput =
        serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
            rmcp::ErrorData::invalid_params(format!("invalid explore parameters: {err}"), None)
        })?;
    let arguments = serde_json::to_value(&input).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode explore arguments: {err}"), None)
    })?;

    let span = info_span!(
        "repoql_explore",
        intent = %input.intent,
        token_budget = input.token_budget,
    );

    async move { Ok(util::proxy_call(&state, "explore", arguments).await) }
        .instrument(span)
        .await
}
