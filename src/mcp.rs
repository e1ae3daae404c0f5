//! MCP tool surface over the index.
//!
//! Exposes a single read-only tool, `query_knowledge_database`, through the
//! MCP Streamable HTTP transport. The query server mounts it at `/mcp` next
//! to the REST routes, so MCP clients and plain HTTP callers share one index.
//!
//! The tool answers with one text block holding a JSON array of hits:
//!
//! ```json
//! [{ "title": "guide", "source": "/docs/guide.md#2", "content": "...", "metadata": { "filepath": "/docs/guide.md" } }]
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use tracing::warn;

use crate::index::{IndexProvider, QueryResult};

pub const QUERY_TOOL: &str = "query_knowledge_database";
const QUERY_TOOL_TITLE: &str = "Query Knowledge Database";
const QUERY_DESCRIPTION: &str = "The search query or question to find relevant information in the \
     knowledge database. Use natural language and be specific about what information you're \
     looking for.";

/// One hit as returned to MCP clients. Empty fields are omitted.
#[derive(Debug, Serialize)]
struct ToolHit {
    #[serde(skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    content: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl From<QueryResult> for ToolHit {
    fn from(result: QueryResult) -> Self {
        Self {
            title: result.title,
            source: result.source,
            content: result.content,
            metadata: result.metadata,
        }
    }
}

/// Serves the query tool for every MCP session.
///
/// Sessions receive clones; the index is shared behind `Arc`.
#[derive(Clone)]
pub struct QueryBridge {
    index: Arc<dyn IndexProvider>,
    limit: usize,
}

impl QueryBridge {
    pub fn new(index: Arc<dyn IndexProvider>, limit: usize) -> Self {
        Self {
            index,
            limit: limit.max(1),
        }
    }

    fn query_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": QUERY_DESCRIPTION,
                }
            },
            "required": ["query"],
        });
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Borrowed(QUERY_TOOL),
            title: Some(QUERY_TOOL_TITLE.to_string()),
            description: Some(Cow::Borrowed(QUERY_DESCRIPTION)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Run the tool against its raw JSON arguments.
    pub async fn query(
        &self,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        let query = arguments
            .as_ref()
            .and_then(|args| args.get("query"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if query.is_empty() {
            return Err(McpError::new(
                ErrorCode::INVALID_PARAMS,
                "query must not be empty".to_string(),
                None,
            ));
        }

        let results = match self.index.query(query, self.limit).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "mcp query failed");
                return Ok(CallToolResult::error(vec![Content::text(format!("{:#}", e))]));
            }
        };

        let hits: Vec<ToolHit> = results.into_iter().map(ToolHit::from).collect();
        let text = serde_json::to_string(&hits).map_err(|e| {
            McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None)
        })?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

impl ServerHandler for QueryBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "index".to_string(),
                title: Some("Context Index".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Use {} to search the indexed documents.",
                QUERY_TOOL
            )),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(vec![Self::query_tool()])))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        (name == QUERY_TOOL).then(Self::query_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if request.name != QUERY_TOOL {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }
        self.query(request.arguments).await
    }
}

/// Streamable HTTP service for [`QueryBridge`], ready to nest into a router.
pub fn service(
    index: Arc<dyn IndexProvider>,
    limit: usize,
) -> StreamableHttpService<QueryBridge, LocalSessionManager> {
    let bridge = QueryBridge::new(index, limit);
    StreamableHttpService::new(
        move || Ok(bridge.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    )
}
