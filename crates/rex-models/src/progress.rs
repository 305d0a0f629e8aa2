//! Progress notifications.

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::SCHEMA_VERSION;

/// Transient progress notification for a job.
///
/// Any number may be published per job. Monotonic progress is a convention
/// of the publisher, not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Job ID
    pub job_id: JobId,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human readable step description
    pub message: String,
}

impl ProgressEvent {
    /// Create a progress event, clamping progress to 100.
    pub fn new(job_id: &JobId, progress: u8, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            progress: progress.min(100),
            message: message.into(),
        }
    }

    /// Stream entry fields; every value is a string.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("schemaVersion", SCHEMA_VERSION.to_string()),
            ("jobId", self.job_id.to_string()),
            ("progress", self.progress.to_string()),
            ("message", self.message.clone()),
        ]
    }
}
