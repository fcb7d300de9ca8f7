//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::playback::PlaybackError;

#[derive(Debug)]
pub enum ApiError {
    Playback(PlaybackError),
    BadRequest(String),
    Internal(String),
}

impl From<PlaybackError> for ApiError {
    fn from(err: PlaybackError) -> Self {
        ApiError::Playback(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Playback(err) => match err {
                PlaybackError::RowOutOfRange { .. }
                | PlaybackError::DatasetNotFound(_)
                | PlaybackError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                PlaybackError::InvalidDatasetName(_) | PlaybackError::InvalidSpeed(_) => {
                    StatusCode::BAD_REQUEST
                }
                PlaybackError::InvalidTransition { .. } => StatusCode::CONFLICT,
                PlaybackError::DatasetLoad { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Playback(err) => {
                if status.is_server_error() {
                    tracing::error!("Playback error: {}", err);
                }
                err.to_string()
            }
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
