//! Terminal job results.

use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;
use crate::job::JobId;
use crate::SCHEMA_VERSION;

/// Separator used when flattening a log tail into one stream field.
pub const LOG_TAIL_SEPARATOR: &str = " | ";

/// Terminal outcome of one export job.
///
/// Published exactly once per consumed message and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportResult {
    #[serde(rename_all = "camelCase")]
    Succeeded {
        artifact_path: String,
        /// `sha256:<hex>`
        checksum: String,
        size_bytes: u64,
        duration_millis: u64,
    },
    Failed {
        error_code: ErrorCode,
        error_message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        log_tail: Vec<String>,
    },
}

impl ExportResult {
    /// Create a failed result.
    pub fn failed(
        error_code: ErrorCode,
        error_message: impl Into<String>,
        log_tail: Vec<String>,
    ) -> Self {
        Self::Failed {
            error_code,
            error_message: error_message.into(),
            log_tail,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExportResult::Succeeded { .. } => "SUCCEEDED",
            ExportResult::Failed { .. } => "FAILED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Succeeded { .. })
    }

    /// Error code for failed results.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ExportResult::Failed { error_code, .. } => Some(*error_code),
            ExportResult::Succeeded { .. } => None,
        }
    }

    /// Stream entry fields for the result stream.
    ///
    /// Absent optional fields are omitted rather than sent empty.
    pub fn to_fields(&self, job_id: &JobId) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("schemaVersion", SCHEMA_VERSION.to_string()),
            ("jobId", job_id.to_string()),
            ("status", self.status().to_string()),
        ];

        match self {
            ExportResult::Succeeded {
                artifact_path,
                checksum,
                size_bytes,
                duration_millis,
            } => {
                fields.push(("artifactPath", artifact_path.clone()));
                fields.push(("checksum", checksum.clone()));
                fields.push(("sizeBytes", size_bytes.to_string()));
                fields.push(("durationMillis", duration_millis.to_string()));
            }
            ExportResult::Failed {
                error_code,
                error_message,
                log_tail,
            } => {
                fields.push(("error_code", error_code.as_str().to_string()));
                fields.push(("error_message", error_message.clone()));
                if !log_tail.is_empty() {
                    fields.push(("logTail", log_tail.join(LOG_TAIL_SEPARATOR)));
                }
            }
        }

        fields
    }
}
