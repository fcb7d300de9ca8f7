//! Playback session endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use super::{run_blocking, ApiError, AppState};
use crate::playback::service::now_ms;
use crate::playback::{PlaybackCommand, Session, SessionSample};

#[derive(Deserialize)]
pub struct DatasetSelection {
    pub filename: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<DatasetSelection>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let service = state.service.clone();
    let session = run_blocking(move || service.create_session(&request.filename)).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Sample the session clock now. Also runs a prefetch pass when one is due.
pub async fn sample_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSample>, ApiError> {
    let service = state.service.clone();
    let sample = run_blocking(move || service.sample_session(&id, now_ms())).await?;
    Ok(Json(sample))
}

pub async fn command_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(command): Json<PlaybackCommand>,
) -> Result<Json<SessionSample>, ApiError> {
    let service = state.service.clone();
    let sample = run_blocking(move || service.command_session(&id, command, now_ms())).await?;
    Ok(Json(sample))
}

pub async fn switch_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DatasetSelection>,
) -> Result<Json<Session>, ApiError> {
    let service = state.service.clone();
    let session =
        run_blocking(move || service.switch_session_dataset(&id, &request.filename)).await?;
    Ok(Json(session))
}

pub async fn drop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.drop_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
