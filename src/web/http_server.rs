//! HTTP facade for recording listings, transform triggers, and status
//!
//! Runs on its own listener, independent of the splice listener(s). A bind
//! failure here is logged but does not abort the process — this facade is
//! auxiliary tooling, the splice path is the system's primary purpose.

use crate::encoder::{self, OutputFormat};
use crate::web::shared::SharedState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

#[derive(Debug, Deserialize)]
pub struct TransformParams {
    record_id: Option<String>,
    storage_id: Option<String>,
    format: Option<String>,
    guacamole: Option<bool>,
}

/// Build the facade's router. Split out from `run` so tests can exercise
/// handlers without binding a socket.
pub fn build_router(state: Arc<SharedState>) -> Router {
    let storage_service = ServeDir::new(state.storage_dir());
    let downloads_service = ServeDir::new(state.downloads_dir());

    Router::new()
        .route("/transform", get(transform_handler))
        .route("/status", get(status_handler))
        .nest_service("/recordings", storage_service.clone())
        .nest_service("/storage", storage_service)
        .nest_service("/enriched", downloads_service)
        .with_state(state)
}

pub async fn run(port: u16, state: Arc<SharedState>) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("HTTP facade failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("HTTP facade listening on http://{}", addr);

    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP facade stopped: {}", e);
    }
}

async fn transform_handler(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<TransformParams>,
) -> impl IntoResponse {
    let record_id = match params.record_id.or(params.storage_id) {
        Some(id) => id,
        None => {
            return (StatusCode::BAD_REQUEST, "record_id or storage_id is required").into_response()
        }
    };

    let format = match params.format.as_deref().map(OutputFormat::parse) {
        Some(Some(fmt)) => fmt,
        Some(None) => return (StatusCode::BAD_REQUEST, "unsupported format").into_response(),
        None => OutputFormat::Mp4,
    };
    let guacamole_framed = params.guacamole.unwrap_or(false);

    let storage_dir = state.storage_dir();
    tokio::spawn(async move {
        match encoder::transform(&storage_dir, &record_id, format, guacamole_framed).await {
            Ok(path) => info!("transform of {} produced {}", record_id, path.display()),
            Err(e) => warn!("transform of {} failed: {}", record_id, e),
        }
    });

    StatusCode::ACCEPTED.into_response()
}

async fn status_handler() -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Json(json!({ "timestamp": timestamp }))
}
