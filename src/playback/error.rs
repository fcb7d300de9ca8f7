//! Playback error types.

use super::state::{PlaybackCommand, PlaybackPhase};

/// Errors raised by the playback subsystem.
///
/// All of them are local to a single request: a failure for one dataset or row
/// never touches cache entries of another.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Row index outside `[0, len)`.
    RowOutOfRange { row: usize, len: usize },
    /// No backing file for the requested dataset.
    DatasetNotFound(String),
    /// Filename rejected before touching the filesystem (path separators, wrong extension).
    InvalidDatasetName(String),
    /// File exists but could not be parsed.
    DatasetLoad { filename: String, reason: String },
    /// Command not valid in the current playback phase.
    InvalidTransition {
        phase: PlaybackPhase,
        command: PlaybackCommand,
    },
    /// Speed multiplier must be finite and > 0.
    InvalidSpeed(f64),
    /// Unknown playback session.
    SessionNotFound(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowOutOfRange { row, len } => {
                write!(f, "row {} out of range (dataset has {} rows)", row, len)
            }
            Self::DatasetNotFound(name) => write!(f, "dataset not found: {}", name),
            Self::InvalidDatasetName(name) => write!(f, "invalid dataset name: {}", name),
            Self::DatasetLoad { filename, reason } => {
                write!(f, "failed to load dataset {}: {}", filename, reason)
            }
            Self::InvalidTransition { phase, command } => {
                write!(f, "command {:?} not allowed while {:?}", command, phase)
            }
            Self::InvalidSpeed(speed) => write!(f, "invalid playback speed: {}", speed),
            Self::SessionNotFound(id) => write!(f, "playback session not found: {}", id),
        }
    }
}

impl std::error::Error for PlaybackError {}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
