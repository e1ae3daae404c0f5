//! Query HTTP server.
//!
//! A thin JSON layer over [`IndexProvider::query`], run next to the periodic
//! synchronizer by `ctx-index serve`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Top-K documents for a free-text query |
//! | `GET`  | `/health` | Health check (returns version and backend) |
//! | `POST` | `/mcp` | MCP Streamable HTTP endpoint, see [`crate::mcp`] |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `query_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::index::{IndexProvider, QueryResult};
use crate::mcp;

/// Upper bound on `limit` accepted from clients.
const MAX_QUERY_LIMIT: usize = 100;

/// Shared state for all route handlers.
#[derive(Clone)]
struct AppState {
    index: Arc<dyn IndexProvider>,
    default_limit: usize,
}

/// Build the router without binding a socket.
pub fn router(index: Arc<dyn IndexProvider>, config: &ServerConfig) -> Router {
    let default_limit = config.query_limit.clamp(1, MAX_QUERY_LIMIT);
    let mcp_service = mcp::service(index.clone(), default_limit);
    let state = AppState {
        index,
        default_limit,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until `cancel` fires.
pub async fn run_server(
    config: &ServerConfig,
    index: Arc<dyn IndexProvider>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(index, config);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(bind = %config.bind, "query server listening");
    println!("Query server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn query_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "query_error",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    backend: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.index.name().to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<QueryResult>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let limit = match request.limit {
        Some(0) => return Err(bad_request("limit must be >= 1")),
        Some(n) => n.min(MAX_QUERY_LIMIT),
        None => state.default_limit,
    };

    let results = state.index.query(query, limit).await.map_err(|e| {
        warn!(error = %e, "query failed");
        query_error(format!("{:#}", e))
    })?;

    Ok(Json(QueryResponse { results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, Embedding};
    use crate::index::MemoryIndex;
    use crate::models::Document;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "len"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Embedding> {
            Ok(Embedding {
                model: "len".to_string(),
                vectors: texts
                    .iter()
                    .map(|t| vec![t.len() as f32, 1.0])
                    .collect(),
            })
        }
    }

    async fn app() -> Router {
        let index = Arc::new(MemoryIndex::new(Arc::new(LengthEmbedder)));
        for (id, text) in [("a", "short"), ("b", "a much longer body of text")] {
            index
                .upsert(&Document {
                    id: id.to_string(),
                    title: id.to_string(),
                    source: format!("/{}.txt#2", id),
                    content: text.to_string(),
                    embedding: vec![text.len() as f32, 1.0],
                    metadata: BTreeMap::new(),
                })
                .await
                .unwrap();
        }
        router(index, &ServerConfig::default())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_query(body: &str) -> Request<Body> {
        Request::post("/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backend"], "memory");
    }

    #[tokio::test]
    async fn test_query_returns_ranked_results() {
        let response = app()
            .await
            .oneshot(post_query(r#"{"query": "tiny", "limit": 1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["source"], "/a.txt#2");
        assert!(results[0].get("embedding").is_none());
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let response = app()
            .await
            .oneshot(post_query(r#"{"query": "   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_mcp_endpoint_is_mounted() {
        let initialize = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0" }
            }
        });
        let request = Request::post("/mcp")
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .body(Body::from(initialize.to_string()))
            .unwrap();

        let response = app().await.oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_success());
    }
}
