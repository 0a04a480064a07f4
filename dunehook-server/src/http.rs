//! Dunehook HTTP API
//!
//! Axum-based HTTP server for Dune webhook deliveries and the read-only timeline API.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, serde_json::Value)`. The inner functions are
//! directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - POST /webhook/dune          — authenticated delivery ingestion
//! - POST /webhook/test          — unauthenticated echo for integration testing
//! - GET  /api/timeline          — 50 newest timeline items
//! - GET  /api/dune-data         — 100 newest raw deliveries
//! - GET  /api/dune-data/latest  — newest raw delivery, or `{}`
//! - GET  /health                — liveness with store probe
//!
//! Any other path is served from the configured static directory, except dotfiles,
//! config files and store files, which answer 404.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use dunehook_core::auth::{SECRET_QUERY_PARAM, SIGNATURE_HEADER};
use dunehook_core::store::{RAW_RESULTS_LIMIT, TIMELINE_LIMIT};
use dunehook_core::{Authenticator, DunehookConfig, Store};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::ingest::{self, DeliveryContext};

const REDACTED: &str = "[redacted]";

/// Extensions never served from the static directory (config and SQLite files).
const PRIVATE_EXTENSIONS: &[&str] = &[
    ".toml", ".env", ".db", ".db-wal", ".db-shm", ".sqlite", ".sqlite3",
];

/// Headers whose values never reach the store.
const REDACTED_HEADERS: &[&str] = &[SIGNATURE_HEADER, "authorization", "cookie", "apikey"];

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn Store>,
    pub auth: Authenticator,
    pub config: DunehookConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let static_files = Router::new()
        .fallback_service(ServeDir::new(&state.config.http.static_dir))
        .layer(middleware::from_fn(hide_private_files));
    let body_limit = state.config.http.body_limit_bytes;

    Router::new()
        .route("/webhook/dune", post(dune_webhook_handler))
        .route("/webhook/test", post(test_webhook_handler))
        .route("/api/timeline", get(timeline_handler))
        .route("/api/dune-data", get(dune_data_handler))
        .route("/api/dune-data/latest", get(latest_dune_data_handler))
        .route("/health", get(health_handler))
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = state.config.listen_addr();

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Dunehook HTTP API listening on http://{}", addr);
    tracing::info!("Webhook URL: http://{}/webhook/dune", addr);
    tracing::info!(
        "Query param URL: http://{}/webhook/dune?{}=YOUR_SECRET",
        addr,
        SECRET_QUERY_PARAM
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// True for paths the static fallback must never serve: any dot-prefixed segment
/// (`.env`, `.git/...`), an encoded dot, or a config/store file extension.
pub fn is_private_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if lower.contains("%2e") {
        return true;
    }
    lower
        .split('/')
        .any(|seg| seg.starts_with('.') || PRIVATE_EXTENSIONS.iter().any(|ext| seg.ends_with(ext)))
}

async fn hide_private_files(req: Request, next: Next) -> Response {
    if is_private_path(req.uri().path()) {
        tracing::debug!(path = %req.uri().path(), "Refusing private static path");
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(req).await
}

fn error_body(msg: &str) -> Value {
    json!({ "error": msg })
}

/// Request headers as a JSON object with credential-bearing values redacted.
pub fn redacted_headers(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let key = name.as_str();
        let text = if REDACTED_HEADERS.contains(&key) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.insert(key.to_string(), Value::String(text));
    }
    Value::Object(map)
}

/// Query parameters as a JSON object with the shared secret redacted.
pub fn redacted_query(params: &HashMap<String, String>) -> Value {
    let map = params
        .iter()
        .map(|(k, v)| {
            let v = if k == SECRET_QUERY_PARAM {
                REDACTED.to_string()
            } else {
                v.clone()
            };
            (k.clone(), Value::String(v))
        })
        .collect();
    Value::Object(map)
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner webhook: authenticate, then parse, persist and derive.
pub async fn dune_webhook_inner(
    state: &HttpState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, Value) {
    let query_secret = params.get(SECRET_QUERY_PARAM).map(String::as_str);
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.auth.authenticate(body, query_secret, signature);
    if !outcome.accepted {
        tracing::warn!(
            auth_method = outcome.method.as_str(),
            body_len = body.len(),
            "Invalid webhook authentication"
        );
        return (StatusCode::UNAUTHORIZED, error_body("Invalid authentication"));
    }
    tracing::debug!(auth_method = outcome.method.as_str(), "Webhook authenticated");

    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(body_len = body.len(), error = %e, "Malformed webhook payload");
            return (StatusCode::BAD_REQUEST, error_body("Malformed JSON payload"));
        }
    };

    let ctx = DeliveryContext {
        delivery_id: Uuid::new_v4(),
        received_at: Utc::now(),
        auth_method: outcome.method,
        headers: redacted_headers(headers),
        query_params: redacted_query(params),
    };

    match ingest::ingest_webhook(&payload, &ctx, state.store.as_ref()).await {
        Ok(report) => (
            StatusCode::OK,
            json!({
                "success": true,
                "message": "Webhook received and processed",
                "timestamp": Utc::now().to_rfc3339(),
                "timeline_items": report.timeline_items,
            }),
        ),
        // ingest_webhook has already logged the failure with delivery context
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error")),
    }
}

/// Inner echo: returns the body untouched.
pub fn test_webhook_inner(payload: Value) -> Value {
    tracing::info!(payload = %payload, "Test webhook received");
    json!({
        "message": "Test webhook received",
        "data": payload,
    })
}

pub async fn timeline_inner(store: &dyn Store) -> (StatusCode, Value) {
    match store.list_timeline_items(TIMELINE_LIMIT).await {
        Ok(items) => (StatusCode::OK, json!(items)),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching timeline data");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error"))
        }
    }
}

pub async fn dune_data_inner(store: &dyn Store) -> (StatusCode, Value) {
    match store.list_raw_results(RAW_RESULTS_LIMIT).await {
        Ok(rows) => (StatusCode::OK, json!(rows)),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching Dune data");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error"))
        }
    }
}

/// Inner latest: an empty store is `{}` with 200, not an error.
pub async fn latest_dune_data_inner(store: &dyn Store) -> (StatusCode, Value) {
    match store.latest_raw_result().await {
        Ok(Some(row)) => (StatusCode::OK, json!(row)),
        Ok(None) => (StatusCode::OK, json!({})),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching latest Dune data");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error"))
        }
    }
}

/// Inner health check: probes the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn Store) -> (StatusCode, Value) {
    let timestamp = Utc::now().to_rfc3339();
    match store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "timestamp": timestamp,
                "database": store.name(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "timestamp": timestamp,
                "database": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn dune_webhook_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = dune_webhook_inner(&state, &params, &headers, &body).await;
    (status, Json(body))
}

pub async fn test_webhook_handler(Json(payload): Json<Value>) -> impl IntoResponse {
    (StatusCode::OK, Json(test_webhook_inner(payload)))
}

pub async fn timeline_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = timeline_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn dune_data_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = dune_data_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn latest_dune_data_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = latest_dune_data_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
