//! HTTP surface over the playback service.
//!
//! - `/api/datasets/*` - catalogue, timelines, per-row payloads, chunks, prefetch
//! - `/api/buffer*` - cache status and buffer settings
//! - `/api/sessions/*` - server-side playback sessions
//! - `/api/sync/*`, `/ws/sync` - cross-window sync

pub mod datasets;
pub mod error;
pub mod sessions;
pub mod sync;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::playback::{PlaybackResult, PlaybackService};

pub use error::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PlaybackService>,
}

/// Create the API router
pub fn create_router(service: Arc<PlaybackService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health_check))
        // Datasets
        .route("/api/datasets", get(datasets::list_datasets))
        .route("/api/datasets/:filename", get(datasets::dataset_info))
        .route("/api/datasets/:filename/timeline", get(datasets::timeline))
        .route("/api/datasets/:filename/rows/:row", get(datasets::row))
        .route("/api/datasets/:filename/resolve", get(datasets::resolve))
        .route("/api/datasets/:filename/chunk", post(datasets::chunk))
        .route("/api/datasets/:filename/prefetch", post(datasets::prefetch))
        // Buffer
        .route(
            "/api/buffer",
            get(datasets::buffer_settings)
                .put(datasets::set_buffer_size)
                .delete(datasets::clear_buffer),
        )
        .route("/api/buffer/status", get(datasets::buffer_status))
        // Sessions
        .route("/api/sessions", post(sessions::create_session))
        .route(
            "/api/sessions/:id",
            get(sessions::sample_session).delete(sessions::drop_session),
        )
        .route("/api/sessions/:id/command", post(sessions::command_session))
        .route("/api/sessions/:id/dataset", put(sessions::switch_dataset))
        // Sync
        .route("/api/sync/publish", post(sync::publish))
        .route("/api/sync/latest", get(sync::latest))
        .route("/api/sync/views", get(sync::list_views).post(sync::set_view))
        .route("/ws/sync", get(sync::websocket_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    datasets_loaded: usize,
    active_sessions: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        datasets_loaded: state.service.store().loaded_count(),
        active_sessions: state.service.sessions().len(),
    })
}

/// Run CPU-bound playback work (CSV load, extraction) off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> PlaybackResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}
