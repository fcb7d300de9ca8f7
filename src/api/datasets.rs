//! Dataset, chunk, prefetch and buffer endpoints.
//!
//! Timeline and per-row payloads are immutable for a given file content, so
//! they carry an ETag derived from the dataset fingerprint.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use super::{run_blocking, ApiError, AppState};
use crate::playback::service::BufferSettings;
use crate::playback::{CacheStats, ChunkRequest, ChunkResponse, DatasetInfo, PrefetchOutcome};

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Serve JSON with ETag/Cache-Control, or 304 when the client already has it.
fn with_etag_headers<T: Serialize>(data: T, etag: &str, request_headers: &HeaderMap) -> Response {
    let matches = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"))
        .unwrap_or(false);
    if matches {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let mut response = Json(data).into_response();
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    response
}

// ===== Request/Response Types =====

#[derive(Serialize)]
pub struct DatasetList {
    pub count: usize,
    pub files: Vec<String>,
}

#[derive(Serialize)]
pub struct TimelineResponse {
    pub filename: String,
    pub fingerprint: String,
    pub total_ms: f64,
    pub offsets: Vec<f64>,
}

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub virtual_time_ms: f64,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub row: usize,
    pub virtual_time_ms: f64,
    /// Cumulative offset of the resolved row.
    pub row_offset_ms: f64,
}

#[derive(Deserialize)]
pub struct PrefetchRequest {
    #[serde(default)]
    pub current_row: usize,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Deserialize)]
pub struct BufferStatusQuery {
    pub filename: String,
    #[serde(default)]
    pub current_row: usize,
}

#[derive(Deserialize)]
pub struct BufferSizeRequest {
    pub size: usize,
}

// ===== Route Handlers =====

pub async fn list_datasets(State(state): State<AppState>) -> Result<Json<DatasetList>, ApiError> {
    let files = state.service.list_datasets()?;
    Ok(Json(DatasetList {
        count: files.len(),
        files,
    }))
}

pub async fn dataset_info(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<DatasetInfo>, ApiError> {
    let service = state.service.clone();
    let info = run_blocking(move || service.dataset_info(&filename)).await?;
    Ok(Json(info))
}

pub async fn timeline(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let service = state.service.clone();
    let dataset = run_blocking(move || service.dataset(&filename)).await?;

    let etag = format!("\"tl-{}\"", dataset.fingerprint());
    let body = TimelineResponse {
        filename: dataset.id().to_string(),
        fingerprint: dataset.fingerprint().to_string(),
        total_ms: dataset.timeline().total_ms(),
        offsets: dataset.timeline().offsets().to_vec(),
    };
    Ok(with_etag_headers(body, &etag, &headers))
}

pub async fn row(
    State(state): State<AppState>,
    Path((filename, row)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let service = state.service.clone();
    let (fingerprint, trace) = run_blocking(move || {
        let dataset = service.dataset(&filename)?;
        let trace = service.trace(&filename, row)?;
        Ok((dataset.fingerprint().to_string(), trace))
    })
    .await?;

    // Bar lengths depend on the scale coefficient, so it is part of the tag.
    let etag = format!(
        "\"row-{}-{}-{}\"",
        fingerprint,
        row,
        state.service.bar_scale_coeff()
    );
    Ok(with_etag_headers(trace, &etag, &headers))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    if !query.virtual_time_ms.is_finite() {
        return Err(ApiError::BadRequest(
            "virtual_time_ms must be a finite number".to_string(),
        ));
    }
    let service = state.service.clone();
    let dataset = run_blocking(move || service.dataset(&filename)).await?;
    let row = dataset.timeline().resolve(query.virtual_time_ms);
    Ok(Json(ResolveResponse {
        row,
        virtual_time_ms: query.virtual_time_ms,
        row_offset_ms: dataset.timeline().offset_of(row),
    }))
}

pub async fn chunk(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Json(request): Json<ChunkRequest>,
) -> Result<Json<ChunkResponse>, ApiError> {
    if request.count == 0 {
        return Err(ApiError::BadRequest("count must be > 0".to_string()));
    }
    let service = state.service.clone();
    let response = run_blocking(move || service.chunk(&filename, request)).await?;
    Ok(Json(response))
}

pub async fn prefetch(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Json(request): Json<PrefetchRequest>,
) -> Result<Json<PrefetchOutcome>, ApiError> {
    let service = state.service.clone();
    let outcome = run_blocking(move || {
        service.prefetch(&filename, request.current_row, request.speed)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn buffer_status(
    State(state): State<AppState>,
    Query(query): Query<BufferStatusQuery>,
) -> Json<CacheStats> {
    Json(state.service.buffer_status(&query.filename, query.current_row))
}

pub async fn buffer_settings(State(state): State<AppState>) -> Json<BufferSettings> {
    Json(state.service.buffer_settings())
}

pub async fn set_buffer_size(
    State(state): State<AppState>,
    Json(request): Json<BufferSizeRequest>,
) -> Json<BufferSettings> {
    Json(state.service.set_buffer_size(request.size))
}

pub async fn clear_buffer(State(state): State<AppState>) -> StatusCode {
    state.service.clear_buffer();
    StatusCode::NO_CONTENT
}
