//! MCP server handler, shared application state, and tool router.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::info_span;

use crate::config::BridgeConfig;
use crate::lifecycle::InstanceRegistry;

/// Shared application state accessible by all MCP tool handlers.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<BridgeConfig>,
    /// Supervised RepoQL instances.
    pub registry: InstanceRegistry,
    /// Workspace every tool call is served from.
    pub workspace_root: PathBuf,
}

/// MCP server implementation that exposes the four RepoQL tools.
pub struct BridgeServer {
    state: Arc<AppState>,
}

impl BridgeServer {
    /// Create a new MCP server bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            let name = tool.name.to_string();
            match name.as_str() {
                "repoql_explore" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::server::tools::explore::handle(context))
                    }));
                }
                "repoql_query" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::server::tools::query::handle(context))
                    }));
                }
                "repoql_read" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::server::tools::read::handle(context))
                    }));
                }
                "repoql_import" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::server::tools::import::handle(context))
                    }));
                }
                _ => {
                    router.add_route(ToolRoute::new_dyn(tool, |_context| {
                        Box::pin(async {
                            Err(rmcp::ErrorData::internal_error(
                                "tool not implemented",
                                None,
                            ))
                        })
                    }));
                }
            }
        }

        router
    }

    /// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    #[allow(clippy::too_many_lines)] // Tool definitions are intentionally verbose for clarity.
    fn all_tools() -> Vec<Tool> {
        vec![
            Tool {
                name: "repoql_explore".into(),
                description: Some(
                    "Semantic exploration of the indexed workspace. Ranks code by \
                     relevance to the stated intent and keywords within a token budget."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "intent": {
                            "type": "string",
                            "enum": ["Inventory", "Locate", "Inspect", "Explain"],
                            "description": "Knowledge state: Inventory (discover), Locate (find), Inspect (structure), Explain (synthesize)"
                        },
                        "tokenBudget": {
                            "type": "number",
                            "description": "Tokens to invest in response (800-5000 typical)"
                        },
                        "uriGlob": {
                            "type": "string",
                            "description": "URI glob pattern to filter results (e.g., file:///src/**/*.cs). Combine with ; exclude with !"
                        },
                        "keywords": {
                            "type": "string",
                            "description": "Search terms - questions work best"
                        },
                        "boost": {
                            "type": "string",
                            "description": "Regex patterns to boost (e.g., (?i)auth|token)"
                        },
                        "penalize": {
                            "type": "string",
                            "description": "Regex patterns to demote (e.g., (?i)test|mock)"
                        },
                        "limit": {
                            "type": "number",
                            "description": "Cap results shown. Leave blank to have explore optimize it."
                        }
                    },
                    "required": ["intent", "tokenBudget"]
                })),
                output_schema: None,
                annotations: None,
                title: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "repoql_query".into(),
                description: Some(
                    "Run a read-only SQL query against the workspace index. The Files, \
                     Functions, Types, and Annotations views are available."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "sql": {
                            "type": "string",
                            "description": "DuckDB SQL query (use Files, Functions, Types, Annotations views)"
                        },
                        "tokenBudget": {
                            "type": "number",
                            "description": "Token budget for the response (default 15000)"
                        }
                    },
                    "required": ["sql"]
                })),
                output_schema: None,
                annotations: None,
                title: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "repoql_read".into(),
                description: Some(
                    "Read files or globs from the indexed workspace, compressed to fit \
                     the given token budget."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "uri": {
                            "type": "string",
                            "description": "URI or glob (e.g., file:///src/Auth.cs). Append ' => question: <question>' for synthesis."
                        },
                        "tokenBudget": {
                            "type": "number",
                            "description": "Token budget - controls representation depth"
                        }
                    },
                    "required": ["uri", "tokenBudget"]
                })),
                output_schema: None,
                annotations: None,
                title: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: "repoql_import".into(),
                description: Some(
                    "Import an external source into the workspace index, or remove one. \
                     Prefix the URI with '-' to remove. Waits until indexing completes."
                        .into(),
                ),
                input_schema: Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "uri": {
                            "type": "string",
                            "description": "URI to import (e.g., github://owner/repo@ref). Prefix with '-' to remove an import."
                        }
                    },
                    "required": ["uri"]
                })),
                output_schema: None,
                annotations: None,
                title: None,
                icons: None,
                meta: None,
            },
        ]
    }
}

impl ServerHandler for BridgeServer {
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();

        async move {
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        let tools = Self::all_tools();

        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }
}
