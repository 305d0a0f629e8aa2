//! Structured export logging.
//!
//! Every event is tagged with the job ID and export type so a single
//! export can be followed from request to artifact.

use std::path::Path;

use tracing::{error, info, warn, Span};

use rex_media::FallbackNote;
use rex_models::{ErrorCode, JobId};

/// Per-export structured logger.
///
/// `export_type` is the export type label, or `decode` before the request
/// is understood.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    export_type: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, export_type: &str) -> Self {
        Self {
            job_id: job_id.as_str().to_string(),
            export_type: export_type.to_string(),
        }
    }

    /// Log the accepted request.
    pub fn log_start(&self, replay_id: &str, owner_id: &str, output_dir: &Path) {
        info!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            replay_id = %replay_id,
            owner_id = %owner_id,
            output_dir = %output_dir.display(),
            "Export started"
        );
    }

    /// Log an intermediate render stage.
    pub fn log_stage(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            "Export stage: {}", message
        );
    }

    /// Log the resolved encoder order.
    pub fn log_encoder_plan(&self, codecs: &[&str]) {
        info!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            plan = %codecs.join(" -> "),
            "Encoder plan resolved"
        );
    }

    /// Log a move down the encoder plan.
    pub fn log_fallback(&self, note: FallbackNote, codec: &str) {
        warn!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            note = %note,
            codec = %codec,
            "Encoder fallback"
        );
    }

    /// Log an encode attempt that failed with attempts remaining.
    pub fn log_attempt_failed(&self, codec: &str, reason: &str) {
        warn!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            codec = %codec,
            "Encode attempt failed: {}", reason
        );
    }

    /// Log a request entry that could not be decoded.
    pub fn log_rejected(&self, entry_id: &str, reason: &str) {
        warn!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            entry_id = %entry_id,
            "Export request rejected: {}", reason
        );
    }

    /// Log a terminal failure.
    pub fn log_failure(&self, code: ErrorCode, message: &str) {
        error!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            error_code = %code.as_str(),
            "Export failed: {}", message
        );
    }

    /// Log the promoted artifact.
    pub fn log_completion(&self, artifact: &Path, size_bytes: u64, checksum: &str) {
        info!(
            job_id = %self.job_id,
            export_type = %self.export_type,
            artifact = %artifact.display(),
            size_bytes,
            checksum = %checksum,
            "Export finished"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn export_type(&self) -> &str {
        &self.export_type
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "export",
            job_id = %self.job_id,
            export_type = %self.export_type
        )
    }
}
