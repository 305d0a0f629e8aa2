//! Error codes surfaced in failed results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure codes published in the result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Probe output missing a usable video stream or duration
    FfprobeInvalidOutput,
    /// Encoder exited non-zero (or could not be started)
    FfmpegEncodeError,
    /// Encoder or frame extraction exceeded its deadline
    FfmpegTimeout,
    /// Helper unreachable, malformed, or judged the frames trivial
    FailedNativeValidation,
    /// Request message could not be decoded
    InvalidExportRequest,
    /// Anything else
    #[default]
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FfprobeInvalidOutput => "FFPROBE_INVALID_OUTPUT",
            ErrorCode::FfmpegEncodeError => "FFMPEG_ENCODE_ERROR",
            ErrorCode::FfmpegTimeout => "FFMPEG_TIMEOUT",
            ErrorCode::FailedNativeValidation => "FAILED_NATIVE_VALIDATION",
            ErrorCode::InvalidExportRequest => "INVALID_EXPORT_REQUEST",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
