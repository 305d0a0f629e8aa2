//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use rex_models::ErrorCode;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while rendering or validating an export.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{program} could not be started: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("FFmpeg exited with non-zero status {exit_code:?}")]
    EncodeFailed {
        exit_code: Option<i32>,
        log_tail: Vec<String>,
    },

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
        log_tail: Vec<String>,
    },

    #[error("Invalid probe output: {0}")]
    InvalidProbe(String),

    #[error("FFprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("Frames are indistinguishable: diff score {score} <= threshold {threshold}")]
    TrivialFrames { score: f64, threshold: f64 },

    #[error("Native validation failed: {message}")]
    NativeValidation {
        message: String,
        log_tail: Vec<String>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a native validation failure carrying diagnostic output.
    pub fn native_validation(message: impl Into<String>, log_tail: Vec<String>) -> Self {
        Self::NativeValidation {
            message: message.into(),
            log_tail,
            source: None,
        }
    }

    /// Create an invalid probe error.
    pub fn invalid_probe(message: impl Into<String>) -> Self {
        Self::InvalidProbe(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Error code published for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            MediaError::SpawnFailed { .. } | MediaError::EncodeFailed { .. } => {
                ErrorCode::FfmpegEncodeError
            }
            MediaError::Timeout { .. } => ErrorCode::FfmpegTimeout,
            MediaError::InvalidProbe(_) | MediaError::FfprobeFailed { .. } => {
                ErrorCode::FfprobeInvalidOutput
            }
            MediaError::FrameSizeMismatch { .. }
            | MediaError::TrivialFrames { .. }
            | MediaError::NativeValidation { .. } => ErrorCode::FailedNativeValidation,
            MediaError::FileNotFound(_) | MediaError::Io(_) | MediaError::Internal(_) => {
                ErrorCode::UnknownError
            }
        }
    }

    /// Bounded diagnostic output attached to this failure.
    pub fn log_tail(&self) -> Vec<String> {
        match self {
            MediaError::EncodeFailed { log_tail, .. }
            | MediaError::Timeout { log_tail, .. }
            | MediaError::NativeValidation { log_tail, .. } => log_tail.clone(),
            MediaError::FfprobeFailed {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => vec![stderr.trim().to_string()],
            _ => Vec::new(),
        }
    }
}
