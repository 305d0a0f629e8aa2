//! Encoding and validation constants.

/// Software fallback codec (H.264).
pub const SOFTWARE_CODEC: &str = "libx264";

/// Canvas used for synthetic replay renders.
pub const RENDER_WIDTH: u32 = 640;
pub const RENDER_HEIGHT: u32 = 360;

/// Sampled frames are extracted as packed rgb24.
pub const FRAME_PIXEL_FORMAT: &str = "rgb24";
pub const FRAME_CHANNELS: u32 = 3;

/// Sample points for the triviality check, as fractions of probed duration.
pub const FIRST_SAMPLE_FRACTION: f64 = 0.1;
pub const SECOND_SAMPLE_FRACTION: f64 = 0.9;

/// Diff scores at or below this are treated as a static/blank render.
pub const DEFAULT_TRIVIAL_DIFF_THRESHOLD: f64 = 0.0005;

/// Duration assumed when a request omits `durationMillis`.
pub const DEFAULT_DURATION_MILLIS: u64 = 5000;

/// Encoder progress is capped here; finalization owns the rest.
pub const ENCODE_PROGRESS_CAP: u8 = 90;

/// Lower bound for any encoder deadline.
pub const MIN_ENCODE_TIMEOUT_MS: u64 = 5000;

/// Deadline for a single frame extraction.
pub const FRAME_EXTRACT_TIMEOUT_MS: u64 = 5000;

/// Thumbnails are rendered as a one second clip.
pub const THUMBNAIL_DURATION_MILLIS: u64 = 1000;

/// Number of stderr lines kept for diagnostics.
pub const LOG_TAIL_LINES: usize = 20;

/// Encoder deadline for a job of the given length.
pub fn encode_timeout_ms(duration_millis: u64) -> u64 {
    duration_millis.saturating_mul(2).max(MIN_ENCODE_TIMEOUT_MS)
}
