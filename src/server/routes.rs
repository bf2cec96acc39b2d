//! Axum HTTP routes for the work server.

use crate::error::ServerError;
use crate::server::validators::decode_body;
use crate::server::WorkServer;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pub server: WorkServer,
}

/// `?client_id=` query string
#[derive(Debug, serde::Deserialize)]
struct ClientQuery {
    client_id: Option<String>,
}

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/get_job", get(get_job))
        .route("/put_results", put(put_results))
        .route("/get_client_id", get(get_client_id))
        .route("/job_stats", get(job_stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "reg-harvester-work-server",
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientQuery>,
) -> Result<impl IntoResponse, ServerError> {
    let job = state.server.get_job(query.client_id.as_deref()).await?;

    let mut inner = Map::new();
    inner.insert(job.job_id.to_string(), Value::String(job.url));
    inner.insert("job_type".into(), Value::String(job.job_type.to_string()));
    inner.insert("reg_id".into(), job.reg_id.map(Value::String).unwrap_or(Value::Null));
    inner.insert("agency".into(), job.agency.map(Value::String).unwrap_or(Value::Null));

    Ok(Json(json!({ "job": inner })))
}

async fn put_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let body = decode_body(&body)?;
    let message = state
        .server
        .put_results(query.client_id.as_deref(), &body)
        .await?;
    Ok(Json(json!({ "success": message })))
}

async fn get_client_id(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServerError> {
    let client_id = state.server.get_client_id().await?;
    Ok(Json(json!({ "client_id": client_id.get() })))
}

async fn job_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ServerError> {
    let status = state.server.job_stats().await?;
    Ok(Json(status))
}

// ─── Server startup ──────────────────────────────────────────────

/// Serve until `shutdown` resolves
pub async fn serve_with_shutdown<F>(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    tracing::info!("Work server listening on http://{}", listener.local_addr()?);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /get_job?client_id=<id>");
    tracing::info!("  PUT  /put_results?client_id=<id>");
    tracing::info!("  GET  /get_client_id");
    tracing::info!("  GET  /job_stats");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Io)?;

    tracing::info!("Work server shut down.");
    Ok(())
}
