//! Hardware encoder detection.
//!
//! Detection spawns `ffmpeg -encoders`, which is slow and cannot change while
//! the process runs, so results are cached by an [`EncoderCache`] owned by
//! whoever renders jobs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::encoder_plan::Accelerator;

/// Deadline for one `ffmpeg -encoders` run.
pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Lazily populated list of usable hardware encoders.
///
/// Only a detection run that produced a listing is cached. When ffmpeg
/// cannot be started or does not answer in time, the caller gets an empty
/// list and the next call tries again.
#[derive(Debug)]
pub struct EncoderCache {
    ffmpeg: PathBuf,
    timeout: Duration,
    detected: OnceCell<Vec<String>>,
}

impl EncoderCache {
    /// Create an empty cache that will probe `ffmpeg` on first use.
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout: DEFAULT_DETECTION_TIMEOUT,
            detected: OnceCell::new(),
        }
    }

    /// Create a cache that is already populated.
    pub fn with_encoders(ffmpeg: impl Into<PathBuf>, encoders: Vec<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout: DEFAULT_DETECTION_TIMEOUT,
            detected: OnceCell::new_with(Some(encoders)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Detected hardware encoders, running detection until it succeeds once.
    pub async fn encoders(&self) -> &[String] {
        let detected = self
            .detected
            .get_or_try_init(|| async {
                detect_hardware_encoders(&self.ffmpeg, self.timeout)
                    .await
                    .ok_or(())
            })
            .await;

        match detected {
            Ok(encoders) => encoders.as_slice(),
            Err(()) => &[],
        }
    }

    pub fn is_populated(&self) -> bool {
        self.detected.initialized()
    }

    /// Forget the cached result so the next call detects again.
    pub fn invalidate(&mut self) {
        self.detected.take();
    }
}

/// Run `ffmpeg -encoders` and report which known hardware encoders it lists.
///
/// Returns `None` when ffmpeg could not be started or missed the deadline;
/// the plan resolver then falls back to software for this job.
pub async fn detect_hardware_encoders(ffmpeg: &Path, timeout: Duration) -> Option<Vec<String>> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-nostdin", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => {
            let listing = String::from_utf8_lossy(&output.stdout);
            let detected = parse_encoder_listing(&listing);
            info!("Detected hardware encoders: {:?}", detected);
            Some(detected)
        }
        Ok(Err(e)) => {
            warn!("Hardware encoder detection failed ({}): {}", ffmpeg.display(), e);
            None
        }
        Err(_) => {
            warn!(
                "Hardware encoder detection timed out after {:?} ({})",
                timeout,
                ffmpeg.display()
            );
            None
        }
    }
}

/// Pick the known hardware encoder names out of an `-encoders` listing.
pub fn parse_encoder_listing(listing: &str) -> Vec<String> {
    let lines: Vec<String> = listing.lines().map(|l| l.to_lowercase()).collect();

    Accelerator::PRIORITY
        .iter()
        .map(|accel| accel.codec())
        .filter(|codec| {
            lines
                .iter()
                .any(|line| line.split_whitespace().any(|word| word == *codec))
        })
        .inspect(|codec| debug!("Encoder listing contains {}", codec))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V....D h264_vaapi           H.264/AVC (VAAPI) (codec h264)
";

    #[test]
    fn test_parse_encoder_listing() {
        assert_eq!(
            parse_encoder_listing(LISTING),
            vec!["h264_nvenc".to_string(), "h264_vaapi".to_string()]
        );
    }

    #[test]
    fn test_parse_ignores_partial_names() {
        let listing = " V....D h264_qsv_fake   not a real encoder\n";
        assert!(parse_encoder_listing(listing).is_empty());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_detects_nothing_and_is_not_cached() {
        let cache = EncoderCache::new("/nonexistent/bin/ffmpeg");
        assert!(!cache.is_populated());
        assert!(cache.encoders().await.is_empty());
        assert!(!cache.is_populated());
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listing_is_cached() {
        let dir = tempfile::TempDir::new().unwrap();
        let ffmpeg = fake_ffmpeg(&dir, "echo ' V....D h264_qsv   Intel QSV H.264'");

        let cache = EncoderCache::new(ffmpeg);
        assert_eq!(cache.encoders().await, ["h264_qsv".to_string()]);
        assert!(cache.is_populated());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wedged_detection_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let ffmpeg = fake_ffmpeg(&dir, "exec sleep 30");

        let started = std::time::Instant::now();
        let cache = EncoderCache::new(ffmpeg).with_timeout(Duration::from_millis(300));
        assert!(cache.encoders().await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!cache.is_populated());
    }

    #[tokio::test]
    async fn test_prepopulated_cache_and_invalidate() {
        let mut cache =
            EncoderCache::with_encoders("/nonexistent/bin/ffmpeg", vec!["h264_qsv".into()]);
        assert_eq!(cache.encoders().await, ["h264_qsv".to_string()]);

        cache.invalidate();
        assert!(!cache.is_populated());
        assert!(cache.encoders().await.is_empty());
    }
}
