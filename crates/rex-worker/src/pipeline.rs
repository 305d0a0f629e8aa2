//! Render pipeline.
//!
//! Runs one export job end to end: encode through the fallback plan, probe,
//! sample two frames, score them with the native helper, then promote the
//! temp file to its final name. The final name is derived from the job ID,
//! so a redelivered job overwrites its own earlier artifact instead of
//! producing a second one.

use std::path::{Path, PathBuf};

use tokio::fs;

use rex_media::encoder_plan::{EncoderConfig, EncoderPlan, FallbackNote};
use rex_media::frames::extract_sample_pair;
use rex_media::fs_utils::{file_size, promote, remove_if_exists, sha256_file};
use rex_media::{
    assert_non_trivial_diff_score, probe_file, EncoderCache, FfmpegCommand, FfmpegRunner,
    LogTail, MediaError, MediaResult, NativeBridge, ProbeResult, ToolPaths,
};
use rex_models::encoding::{
    encode_timeout_ms, RENDER_HEIGHT, RENDER_WIDTH, THUMBNAIL_DURATION_MILLIS,
};
use rex_models::{ExportJobMessage, ExportResult, ExportType, JobId};

use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressReporter;

/// A promoted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub artifact_path: PathBuf,
    /// `sha256:<hex>`
    pub checksum: String,
    pub size_bytes: u64,
    pub duration_millis: u64,
}

impl From<RenderOutcome> for ExportResult {
    fn from(outcome: RenderOutcome) -> Self {
        ExportResult::Succeeded {
            artifact_path: outcome.artifact_path.to_string_lossy().to_string(),
            checksum: outcome.checksum,
            size_bytes: outcome.size_bytes,
            duration_millis: outcome.duration_millis,
        }
    }
}

/// Temp and final locations of one job's artifact.
#[derive(Debug, Clone)]
struct ArtifactPaths {
    tmp: PathBuf,
    dst: PathBuf,
}

impl ArtifactPaths {
    fn new(output_dir: &Path, job_id: &JobId, extension: &str) -> Self {
        Self {
            tmp: output_dir.join(format!("{}.tmp.{}", job_id, extension)),
            dst: output_dir.join(format!("{}.{}", job_id, extension)),
        }
    }
}

/// Renders export jobs.
pub struct RenderPipeline {
    tools: ToolPaths,
    encoders: EncoderCache,
    bridge: NativeBridge,
    trivial_diff_threshold: f64,
}

impl RenderPipeline {
    pub fn new(tools: ToolPaths, bridge: NativeBridge, trivial_diff_threshold: f64) -> Self {
        let encoders = EncoderCache::new(tools.ffmpeg.clone());
        Self {
            tools,
            encoders,
            bridge,
            trivial_diff_threshold,
        }
    }

    /// Replace the hardware encoder cache.
    pub fn with_encoder_cache(mut self, encoders: EncoderCache) -> Self {
        self.encoders = encoders;
        self
    }

    /// Render one job.
    ///
    /// Diagnostic lines from every subprocess land in `tail`. On failure the
    /// temp file is removed and the final path is left untouched.
    pub async fn render(
        &self,
        job: &ExportJobMessage,
        progress: &ProgressReporter,
        logger: &JobLogger,
        tail: &LogTail,
    ) -> MediaResult<RenderOutcome> {
        fs::create_dir_all(&job.output_dir).await?;

        match job.export_type {
            ExportType::Mp4 => self.render_mp4(job, progress, logger, tail).await,
            ExportType::Thumbnail => self.render_thumbnail(job, progress, logger, tail).await,
        }
    }

    async fn render_mp4(
        &self,
        job: &ExportJobMessage,
        progress: &ProgressReporter,
        logger: &JobLogger,
        tail: &LogTail,
    ) -> MediaResult<RenderOutcome> {
        let paths = ArtifactPaths::new(&job.output_dir, &job.job_id, "mp4");
        progress.report(10, "encoder starting");

        let validated = self
            .encode_and_validate(job, &paths.tmp, progress, logger, tail)
            .await;
        let probe = discard_on_error(&paths.tmp, validated).await?;

        progress.report(95, "validating");
        discard_on_error(&paths.tmp, promote(&paths.tmp, &paths.dst).await).await?;
        let checksum = sha256_file(&paths.dst).await?;
        let size_bytes = file_size(&paths.dst).await?;
        progress.report(100, "complete");

        Ok(RenderOutcome {
            artifact_path: paths.dst,
            checksum,
            size_bytes,
            duration_millis: probe.duration_ms,
        })
    }

    async fn encode_and_validate(
        &self,
        job: &ExportJobMessage,
        tmp: &Path,
        progress: &ProgressReporter,
        logger: &JobLogger,
        tail: &LogTail,
    ) -> MediaResult<ProbeResult> {
        let plan = EncoderPlan::resolve(job.prefer_hw, self.encoders.encoders().await);
        let codecs: Vec<&str> = plan.iter().map(|c| c.codec.as_str()).collect();
        logger.log_encoder_plan(&codecs);

        self.encode_with_plan(job, &plan, tmp, progress, logger, tail)
            .await?;

        let probe = probe_file(&self.tools.ffprobe, tmp).await?;
        logger.log_stage(&format!(
            "probed {}x{} {} ms",
            probe.width, probe.height, probe.duration_ms
        ));

        let (first, second) = extract_sample_pair(&self.tools.ffmpeg, tmp, &probe, tail).await?;
        let score = self
            .bridge
            .analyze_frames_from_buffers(
                &first.data,
                &second.data,
                first.width,
                first.height,
                first.channels,
            )
            .await?;
        assert_non_trivial_diff_score(score, self.trivial_diff_threshold)?;

        Ok(probe)
    }

    /// Try each plan entry in order until one encodes.
    async fn encode_with_plan(
        &self,
        job: &ExportJobMessage,
        plan: &EncoderPlan,
        tmp: &Path,
        progress: &ProgressReporter,
        logger: &JobLogger,
        tail: &LogTail,
    ) -> MediaResult<()> {
        let attempts = plan.len();

        for (attempt, config) in plan.iter().enumerate() {
            if let Some(note) = config.fallback_note {
                logger.log_fallback(note, &config.codec);
                tail.push(note.as_str());
                metrics::record_encoder_fallback(note.as_str());
                if note == FallbackNote::HwaccelHandshakeFailed {
                    progress.report(10, "hardware encoder failed, falling back to software");
                }
            }

            let runner = FfmpegRunner::new(&self.tools.ffmpeg)
                .with_timeout_ms(encode_timeout_ms(job.duration_millis))
                .with_log_tail(tail.clone())
                .with_operation("ffmpeg encode");

            let result = runner
                .run_with_progress(
                    &mp4_command(job, config, tmp),
                    job.duration_millis,
                    progress.encode_callback(),
                )
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < attempts => {
                    logger.log_attempt_failed(&config.codec, &e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Err(MediaError::internal("encoder plan is empty"))
    }

    async fn render_thumbnail(
        &self,
        job: &ExportJobMessage,
        progress: &ProgressReporter,
        logger: &JobLogger,
        tail: &LogTail,
    ) -> MediaResult<RenderOutcome> {
        let paths = ArtifactPaths::new(&job.output_dir, &job.job_id, "png");
        progress.report(10, "encoder starting");

        let runner = FfmpegRunner::new(&self.tools.ffmpeg)
            .with_timeout_ms(encode_timeout_ms(THUMBNAIL_DURATION_MILLIS))
            .with_log_tail(tail.clone())
            .with_operation("ffmpeg thumbnail");
        let encoded = runner.run(&thumbnail_command(job, &paths.tmp)).await;
        discard_on_error(&paths.tmp, encoded).await?;

        let checksum = discard_on_error(&paths.tmp, sha256_file(&paths.tmp).await).await?;
        discard_on_error(&paths.tmp, promote(&paths.tmp, &paths.dst).await).await?;
        let size_bytes = file_size(&paths.dst).await?;
        logger.log_stage("thumbnail written");
        progress.report(100, "complete");

        Ok(RenderOutcome {
            artifact_path: paths.dst,
            checksum,
            size_bytes,
            duration_millis: 0,
        })
    }
}

/// Remove the temp artifact when `result` is a failure.
async fn discard_on_error<T>(tmp: &Path, result: MediaResult<T>) -> MediaResult<T> {
    if result.is_err() {
        remove_if_exists(tmp).await;
    }
    result
}

/// Replay IDs end up inside a filter graph; keep only characters that need
/// no escaping there.
fn overlay_text(replay_id: &str) -> String {
    replay_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

fn mp4_command(job: &ExportJobMessage, config: &EncoderConfig, output: &Path) -> FfmpegCommand {
    let seconds = (job.duration_millis as f64 / 1000.0).max(1.0);

    FfmpegCommand::lavfi(format!(
        "color=c=black:s={}x{}:d={}",
        RENDER_WIDTH, RENDER_HEIGHT, seconds
    ))
    .pre_args(config.pre_args.iter().cloned())
    .video_filter(format!(
        "drawtext=text='Replay {} %{{eif\\:t\\:d}}ms':fontcolor=white:fontsize=32:x=20:y=20",
        overlay_text(&job.replay_id)
    ))
    .pixel_format("yuv420p")
    .progress_to_stdout()
    .video_codec(&config.codec)
    .output(output)
}

fn thumbnail_command(job: &ExportJobMessage, output: &Path) -> FfmpegCommand {
    FfmpegCommand::lavfi(format!(
        "color=c=blue:s={}x{}:d=1",
        RENDER_WIDTH, RENDER_HEIGHT
    ))
    .video_filter(format!(
        "drawtext=text='Replay {} thumbnail':fontcolor=white:fontsize=28:x=20:y=20",
        overlay_text(&job.replay_id)
    ))
    .single_frame()
    .output(output)
}
