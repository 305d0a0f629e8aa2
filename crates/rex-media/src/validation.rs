//! Content validation policy.

use rex_models::encoding::DEFAULT_TRIVIAL_DIFF_THRESHOLD;

use crate::error::{MediaError, MediaResult};

/// Reject a render whose sampled frames are indistinguishable.
///
/// Fails iff `score <= threshold`. A NaN score cannot prove the frames differ
/// and is rejected too.
pub fn assert_non_trivial_diff_score(score: f64, threshold: f64) -> MediaResult<()> {
    if score.is_nan() || score <= threshold {
        return Err(MediaError::TrivialFrames { score, threshold });
    }
    Ok(())
}

/// Threshold from `TRIVIAL_DIFF_THRESHOLD`, defaulting when unset or not finite.
pub fn trivial_diff_threshold_from_env() -> f64 {
    std::env::var("TRIVIAL_DIFF_THRESHOLD")
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .unwrap_or(DEFAULT_TRIVIAL_DIFF_THRESHOLD)
}
