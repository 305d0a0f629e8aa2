//! Raw frame sampling for content validation.

use std::path::Path;
use tracing::debug;

use rex_models::encoding::{
    FIRST_SAMPLE_FRACTION, FRAME_CHANNELS, FRAME_EXTRACT_TIMEOUT_MS, FRAME_PIXEL_FORMAT,
    SECOND_SAMPLE_FRACTION,
};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::log_tail::LogTail;
use crate::probe::ProbeResult;

/// A decoded frame in `rgb24`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl RawFrame {
    /// Byte length a `width x height` frame must have.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * FRAME_CHANNELS as usize
    }
}

/// Seek positions in seconds for the two validation samples.
pub fn sample_positions(duration_ms: u64) -> (f64, f64) {
    let seconds = duration_ms as f64 / 1000.0;
    (seconds * FIRST_SAMPLE_FRACTION, seconds * SECOND_SAMPLE_FRACTION)
}

/// Extract one frame at `at_seconds`.
pub async fn extract_frame(
    ffmpeg: &Path,
    input: &Path,
    at_seconds: f64,
    width: u32,
    height: u32,
    log_tail: &LogTail,
) -> MediaResult<RawFrame> {
    debug!("Extracting frame at {:.3}s from {}", at_seconds, input.display());

    let cmd = FfmpegCommand::file(input)
        .seek(at_seconds)
        .single_frame()
        .raw_video(FRAME_PIXEL_FORMAT)
        .output_to_stdout();

    let data = FfmpegRunner::new(ffmpeg)
        .with_timeout_ms(FRAME_EXTRACT_TIMEOUT_MS)
        .with_log_tail(log_tail.clone())
        .with_operation("frame extraction")
        .run_capture(&cmd)
        .await?;

    let expected = RawFrame::expected_len(width, height);
    if data.len() != expected {
        return Err(MediaError::FrameSizeMismatch {
            expected,
            actual: data.len(),
        });
    }

    Ok(RawFrame {
        data,
        width,
        height,
        channels: FRAME_CHANNELS,
    })
}

/// Extract the two validation samples at 10% and 90% of the probed duration.
pub async fn extract_sample_pair(
    ffmpeg: &Path,
    input: &Path,
    probe: &ProbeResult,
    log_tail: &LogTail,
) -> MediaResult<(RawFrame, RawFrame)> {
    let (first_at, second_at) = sample_positions(probe.duration_ms);
    let first = extract_frame(ffmpeg, input, first_at, probe.width, probe.height, log_tail).await?;
    let second =
        extract_frame(ffmpeg, input, second_at, probe.width, probe.height, log_tail).await?;
    Ok((first, second))
}
