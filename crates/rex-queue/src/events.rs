//! Progress and result publication.

use async_trait::async_trait;
use tracing::debug;

use rex_models::{ExportResult, JobId, ProgressEvent};

use crate::error::QueueResult;
use crate::queue::ExportQueue;

/// Destination for job events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one progress notification.
    async fn publish_progress(&self, event: &ProgressEvent) -> QueueResult<()>;

    /// Publish the terminal result of a job.
    async fn publish_result(&self, job_id: &JobId, result: &ExportResult) -> QueueResult<()>;
}

/// `XADD <stream> * <field> <value> ...`
pub fn xadd_command(stream: &str, fields: &[(&'static str, String)]) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("*");
    for (key, value) in fields {
        cmd.arg(*key).arg(value);
    }
    cmd
}

impl ExportQueue {
    async fn append(&self, stream: &str, fields: &[(&'static str, String)]) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let entry_id: String = xadd_command(stream, fields).query_async(&mut conn).await?;
        Ok(entry_id)
    }
}

#[async_trait]
impl EventSink for ExportQueue {
    async fn publish_progress(&self, event: &ProgressEvent) -> QueueResult<()> {
        let entry_id = self
            .append(&self.config().progress_stream, &event.to_fields())
            .await?;
        debug!(
            "Published progress {}% for job {} as {}",
            event.progress, event.job_id, entry_id
        );
        Ok(())
    }

    async fn publish_result(&self, job_id: &JobId, result: &ExportResult) -> QueueResult<()> {
        let entry_id = self
            .append(&self.config().result_stream, &result.to_fields(job_id))
            .await?;
        debug!(
            "Published {} result for job {} as {}",
            result.status(),
            job_id,
            entry_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &redis::Cmd) -> Vec<String> {
        cmd.args_iter()
            .map(|arg| match arg {
                redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).to_string(),
                redis::Arg::Cursor => "<cursor>".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_progress_entry_layout() {
        let event = ProgressEvent::new(&JobId::from_string("job-7"), 10, "encoder starting");
        let cmd = xadd_command("replay.export.progress", &event.to_fields());
        assert_eq!(
            args(&cmd),
            [
                "XADD",
                "replay.export.progress",
                "*",
                "schemaVersion",
                "1",
                "jobId",
                "job-7",
                "progress",
                "10",
                "message",
                "encoder starting"
            ]
        );
    }

    #[test]
    fn test_failed_result_without_tail_omits_field() {
        let result = ExportResult::failed(
            rex_models::ErrorCode::FfprobeInvalidOutput,
            "no video stream",
            Vec::new(),
        );
        let cmd = xadd_command("replay.export.result", &result.to_fields(&JobId::from_string("j")));
        let args = args(&cmd);
        assert!(args.contains(&"FAILED".to_string()));
        assert!(args.contains(&"FFPROBE_INVALID_OUTPUT".to_string()));
        assert!(!args.contains(&"logTail".to_string()));
    }
}
