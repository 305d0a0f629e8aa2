//! FFmpeg progress parsing.

use rex_models::encoding::ENCODE_PROGRESS_CAP;

/// Output position reported by FFmpeg's `-progress` key/value output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    /// Output position in microseconds (ffmpeg's `out_time_ms` key)
    pub out_time_us: i64,
}

impl FfmpegProgress {
    /// Encode progress for a job of `duration_ms`, capped below 100.
    pub fn percentage(&self, duration_ms: u64) -> u8 {
        encode_percentage(self.out_time_us, duration_ms)
    }
}

/// `min(90, floor(out_time_us / (duration_ms * 1000) * 100))`.
pub fn encode_percentage(out_time_us: i64, duration_ms: u64) -> u8 {
    if duration_ms == 0 || out_time_us <= 0 {
        return 0;
    }
    let pct = (out_time_us as f64 / (duration_ms as f64 * 1000.0)) * 100.0;
    pct.floor().min(ENCODE_PROGRESS_CAP as f64) as u8
}

/// Feed one `-progress` line into `current`.
///
/// Returns `true` for `out_time_ms` lines, which is when a progress
/// notification should be emitted. FFmpeg also prints `out_time_us` with the
/// same value in every block; it is ignored so each block notifies once.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> bool {
    let Some((key, value)) = line.trim().split_once('=') else {
        return false;
    };

    if key != "out_time_ms" {
        return false;
    }
    match value.trim().parse::<i64>() {
        Ok(us) => {
            current.out_time_us = us;
            true
        }
        Err(_) => false,
    }
}
