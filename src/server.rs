//! HTTP surface for the query node.
//!
//! Translates wire requests into [`Resolver`] calls and resolver outcomes
//! into JSON responses. No pipeline logic lives here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service name and version |
//! | `GET`  | `/health` | Liveness check |
//! | `POST` | `/query/rag` | Query a registry file by `file_id` or `file_url` |
//! | `POST` | `/query/local` | Index caller-supplied content and query it |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "message": "'query' is required", "type": "invalid_request_error" } }
//! ```
//!
//! | Type | Status |
//! |------|--------|
//! | `invalid_request_error` | 400 |
//! | `not_found` | 404 |
//! | `upstream_error`, `configuration_error` | 502 |
//! | `internal_error` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted. Preflight `OPTIONS`
//! requests are answered with `204 No Content` and an empty body.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use query_node_core::chunk::ParagraphChunker;
use query_node_core::models::{
    LocalQueryRequest, LocalQueryResponse, QueryRequest, QueryResponse,
};
use query_node_core::{QueryError, Resolver};

use crate::backend;
use crate::config::Config;
use crate::decrypt::HttpDecryptor;
use crate::registry::HttpRegistry;

#[derive(Clone)]
struct AppState {
    resolver: Resolver,
}

/// Build the application router around an already-wired resolver.
pub fn router(resolver: Resolver) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query/rag", post(handle_rag))
        .route("/query/local", post(handle_local))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { resolver })
}

/// Starts the HTTP server.
///
/// Wires the HTTP registry client, the decryption gateway client and the
/// configured collection store into a [`Resolver`], then serves on
/// `[server].bind` until interrupted.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let registry = Arc::new(HttpRegistry::new(&config.registry)?);
    let decryptor = Arc::new(HttpDecryptor::new(&config.decryption)?);
    let store = backend::open_store(config).await;

    let resolver = Resolver::new(registry, decryptor, store, config.resolver_settings())
        .with_chunker(Arc::new(ParagraphChunker::new(config.chunking.max_tokens)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        bind = %config.server.bind,
        registry = %config.registry.url,
        "query node listening"
    );

    axum::serve(listener, router(resolver))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("query node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// The CORS layer answers preflights itself with `200`; report them as
/// `204` instead.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let status = match &err {
            QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Upstream { .. } | QueryError::Configuration { .. } => {
                StatusCode::BAD_GATEWAY
            }
            QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            kind: err.error_type(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request_error",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), kind = self.kind, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.message,
                kind: self.kind,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET / and GET /health ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Private Data Query Node",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "Server is running",
    })
}

// ============ POST /query/rag ============

async fn handle_rag(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = body?;
    let response = state.resolver.resolve(&req).await?;
    Ok(Json(response))
}

// ============ POST /query/local ============

async fn handle_local(
    State(state): State<AppState>,
    body: Result<Json<LocalQueryRequest>, JsonRejection>,
) -> Result<Json<LocalQueryResponse>, AppError> {
    let Json(req) = body?;
    let response = state.resolver.query_local(&req).await?;
    Ok(Json(response))
}
