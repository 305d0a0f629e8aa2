//! Per-message job handling.
//!
//! Turns one request stream entry into exactly one published result. Every
//! failure, including an undecodable entry, becomes a `FAILED` result rather
//! than an error; acknowledging the entry is the caller's job.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn, Instrument};

use rex_media::{LogTail, MediaError};
use rex_models::{DecodeDefaults, ErrorCode, ExportJobMessage, ExportResult, JobId};
use rex_queue::{EventSink, StreamMessage};

use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::RenderPipeline;
use crate::progress::progress_channel;

/// Decodes, renders and reports one export request at a time.
pub struct JobHandler {
    pipeline: RenderPipeline,
    sink: Arc<dyn EventSink>,
    decode_defaults: DecodeDefaults,
}

impl JobHandler {
    pub fn new(
        pipeline: RenderPipeline,
        sink: Arc<dyn EventSink>,
        decode_defaults: DecodeDefaults,
    ) -> Self {
        Self {
            pipeline,
            sink,
            decode_defaults,
        }
    }

    /// Handle one entry and publish its result.
    ///
    /// All progress events for the job are on the progress stream before the
    /// result is published.
    pub async fn handle(&self, message: &StreamMessage) -> ExportResult {
        let job = match ExportJobMessage::from_fields(&message.fields, &self.decode_defaults) {
            Ok(job) => job,
            Err(e) => return self.reject(message, e.to_string()).await,
        };

        let logger = JobLogger::new(&job.job_id, job.export_type.label());
        let span = logger.create_span();
        let result = self.run(&job, &logger).instrument(span).await;

        self.publish(&job.job_id, &result).await;
        result
    }

    async fn run(&self, job: &ExportJobMessage, logger: &JobLogger) -> ExportResult {
        let started = Instant::now();
        logger.log_start(&job.replay_id, &job.owner_id, &job.output_dir);

        let (reporter, forwarder) = progress_channel(&job.job_id, Arc::clone(&self.sink));
        let tail = LogTail::default();
        reporter.report(5, "job received");

        let rendered = self.pipeline.render(job, &reporter, logger, &tail).await;
        drop(reporter);
        forwarder.flush().await;

        let label = job.export_type.label();
        metrics::record_job_duration(label, started.elapsed().as_secs_f64());

        match rendered {
            Ok(outcome) => {
                logger.log_completion(
                    &outcome.artifact_path,
                    outcome.size_bytes,
                    &outcome.checksum,
                );
                metrics::record_job_completed(label);
                outcome.into()
            }
            Err(e) => {
                logger.log_failure(e.code(), &e.to_string());
                metrics::record_job_failed(label, e.code().as_str());
                failure_result(&e, &tail)
            }
        }
    }

    /// Publish `INVALID_EXPORT_REQUEST` for an entry that could not be decoded.
    async fn reject(&self, message: &StreamMessage, reason: String) -> ExportResult {
        let job_id = message
            .fields
            .get("jobId")
            .filter(|id| !id.trim().is_empty())
            .map(|id| JobId::from_string(id.as_str()))
            .unwrap_or_else(|| JobId::from_string(message.id.as_str()));

        let logger = JobLogger::new(&job_id, "decode");
        logger.log_rejected(&message.id, &reason);
        metrics::record_job_failed("unknown", ErrorCode::InvalidExportRequest.as_str());

        let result = ExportResult::failed(ErrorCode::InvalidExportRequest, reason, Vec::new());
        self.publish(&job_id, &result).await;
        result
    }

    async fn publish(&self, job_id: &JobId, result: &ExportResult) {
        if let Err(e) = self.sink.publish_result(job_id, result).await {
            error!(job_id = %job_id, "Failed to publish {} result: {}", result.status(), e);
        }
    }
}

/// The error's own tail wins; otherwise whatever the job's subprocesses left
/// in the shared tail.
fn failure_result(err: &MediaError, tail: &LogTail) -> ExportResult {
    let mut log_tail = err.log_tail();
    if log_tail.is_empty() {
        log_tail = tail.snapshot();
    }
    if log_tail.is_empty() {
        warn!("No diagnostic output captured for {}", err.code());
    }
    ExportResult::failed(err.code(), err.to_string(), log_tail)
}


#[cfg(all(test, unix))]
mod scenario_tests {
    use super::*;
    use std::collections::HashMap;

    use crate::testing::{FakeMedia, FakeTools, Recorded, RecordingSink};

    fn handler(fake: &FakeTools, sink: Arc<RecordingSink>) -> JobHandler {
        let pipeline = RenderPipeline::new(fake.tools.clone(), fake.bridge(), 0.0005)
            .with_encoder_cache(fake.encoder_cache(&[]));
        let defaults = DecodeDefaults {
            storage_root: fake.dir.path().to_path_buf(),
            export_dir: "exports".to_string(),
            prefer_hw: false,
        };
        JobHandler::new(pipeline, sink, defaults)
    }

    fn message(id: &str, fields: &[(&str, &str)]) -> StreamMessage {
        StreamMessage {
            id: id.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn request(job_id: &str) -> StreamMessage {
        message(
            "1700000000000-0",
            &[
                ("jobId", job_id),
                ("replayId", "replay-42"),
                ("ownerId", "owner-1"),
                ("type", "MP4"),
                ("durationMillis", "5000"),
            ],
        )
    }

    #[tokio::test]
    async fn test_success_publishes_result_after_progress() {
        let fake = FakeTools::install(FakeMedia::default());
        let sink = Arc::new(RecordingSink::default());

        let result = handler(&fake, sink.clone()).handle(&request("job-1")).await;
        assert!(result.is_success());

        let events = sink.events();
        assert!(matches!(events.last(), Some(Recorded::Result(..))));
        assert_eq!(sink.results().len(), 1);
        assert_eq!(sink.progress_values(), vec![5, 10, 20, 50, 95, 100]);

        let (job_id, published) = &sink.results()[0];
        assert_eq!(job_id.as_str(), "job-1");
        match published {
            ExportResult::Succeeded { artifact_path, .. } => {
                assert_eq!(
                    std::path::PathBuf::from(artifact_path),
                    fake.output_dir().join("job-1.mp4")
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redelivery_overwrites_same_artifact() {
        let fake = FakeTools::install(FakeMedia::default());
        let sink = Arc::new(RecordingSink::default());
        let handler = handler(&fake, sink.clone());

        handler.handle(&request("job-1")).await;
        handler.handle(&request("job-1")).await;

        let mut names: Vec<String> = std::fs::read_dir(fake.output_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["job-1.mp4"]);
        assert_eq!(sink.results().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_result_carries_code_and_tail() {
        let fake = FakeTools::install(FakeMedia {
            failing_codecs: vec!["libx264"],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let result = handler(&fake, sink.clone()).handle(&request("job-2")).await;

        match result {
            ExportResult::Failed {
                error_code,
                log_tail,
                ..
            } => {
                assert_eq!(error_code, ErrorCode::FfmpegEncodeError);
                assert!(log_tail.contains(&"libx264: no capable device".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(sink.events().last(), Some(Recorded::Result(..))));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_rejected() {
        let fake = FakeTools::install(FakeMedia::default());
        let sink = Arc::new(RecordingSink::default());

        let result = handler(&fake, sink.clone())
            .handle(&message("1700000000001-0", &[("jobId", "job-3"), ("type", "GIF")]))
            .await;

        assert_eq!(result.error_code(), Some(ErrorCode::InvalidExportRequest));
        assert!(sink.progress_values().is_empty());
        assert!(fake.encode_calls().is_empty());
        let results = sink.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.as_str(), "job-3");
    }

    #[tokio::test]
    async fn test_rejection_without_job_id_uses_entry_id() {
        let fake = FakeTools::install(FakeMedia::default());
        let sink = Arc::new(RecordingSink::default());

        handler(&fake, sink.clone())
            .handle(&message("1700000000002-0", &[("replayId", "r")]))
            .await;

        assert_eq!(sink.results()[0].0.as_str(), "1700000000002-0");
    }
}
