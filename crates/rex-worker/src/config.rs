//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use rex_media::validation::trivial_diff_threshold_from_env;
use rex_media::ToolPaths;
use rex_models::encoding::DEFAULT_TRIVIAL_DIFF_THRESHOLD;
use rex_models::DecodeDefaults;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root directory that default output directories are derived from
    pub storage_root: PathBuf,
    /// Export subdirectory below the storage root
    pub export_dir: String,
    /// Prefer hardware encoders for every job
    pub prefer_hw: bool,
    /// Diff scores at or below this reject the render
    pub trivial_diff_threshold: f64,
    /// ffmpeg / ffprobe locations
    pub tools: ToolPaths,
    /// Pause after a broker error before reading again
    pub error_backoff: Duration,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let decode = DecodeDefaults::default();
        Self {
            storage_root: decode.storage_root,
            export_dir: decode.export_dir,
            prefer_hw: false,
            trivial_diff_threshold: DEFAULT_TRIVIAL_DIFF_THRESHOLD,
            tools: ToolPaths::default(),
            error_backoff: Duration::from_secs(5),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_root: std::env::var("APP_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            export_dir: std::env::var("APP_STORAGE_EXPORT").unwrap_or(defaults.export_dir),
            prefer_hw: std::env::var("EXPORT_HW_ACCEL")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            trivial_diff_threshold: trivial_diff_threshold_from_env(),
            tools: ToolPaths::from_env(),
            error_backoff: defaults.error_backoff,
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Defaults applied while decoding request entries.
    pub fn decode_defaults(&self) -> DecodeDefaults {
        DecodeDefaults {
            storage_root: self.storage_root.clone(),
            export_dir: self.export_dir.clone(),
            prefer_hw: self.prefer_hw,
        }
    }
}
