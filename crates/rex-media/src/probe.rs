//! FFprobe structural validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What a valid export looks like to the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Container duration in whole milliseconds
    pub duration_ms: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// FFprobe JSON output format.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    /// ffprobe prints this as a string; some wrappers emit a number
    pub duration: Option<serde_json::Value>,
}

/// Check a probe document describes a playable video.
pub fn validate_probe_output(probe: &FfprobeOutput) -> MediaResult<ProbeResult> {
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::invalid_probe("no video stream"))?;

    let width = positive_dimension(video.width, "width")?;
    let height = positive_dimension(video.height, "height")?;

    let seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .ok_or_else(|| MediaError::invalid_probe("missing format duration"))
        .and_then(duration_seconds)?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(MediaError::invalid_probe(format!(
            "duration must be positive and finite, got {}",
            seconds
        )));
    }

    Ok(ProbeResult {
        duration_ms: (seconds * 1000.0).round() as u64,
        width,
        height,
    })
}

/// Parse raw ffprobe JSON and validate it.
pub fn parse_probe_output(raw: &[u8]) -> MediaResult<ProbeResult> {
    let probe: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| MediaError::invalid_probe(format!("unparsable ffprobe output: {}", e)))?;
    validate_probe_output(&probe)
}

/// Probe a file with ffprobe.
pub async fn probe_file(ffprobe: &Path, path: &Path) -> MediaResult<ProbeResult> {
    debug!("Probing {}", path.display());

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(MediaError::FfprobeFailed {
                message: format!("{} could not be started: {}", ffprobe.display(), e),
                stderr: None,
            })
        }
        Err(_) => {
            return Err(MediaError::FfprobeFailed {
                message: format!("ffprobe timed out after {} s", PROBE_TIMEOUT.as_secs()),
                stderr: None,
            })
        }
    };

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn positive_dimension(value: Option<i64>, name: &str) -> MediaResult<u32> {
    match value {
        Some(v) if v > 0 => u32::try_from(v)
            .map_err(|_| MediaError::invalid_probe(format!("{} out of range: {}", name, v))),
        Some(v) => Err(MediaError::invalid_probe(format!(
            "{} must be positive, got {}",
            name, v
        ))),
        None => Err(MediaError::invalid_probe(format!("missing {}", name))),
    }
}

fn duration_seconds(value: &serde_json::Value) -> MediaResult<f64> {
    let parsed = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| MediaError::invalid_probe(format!("non-numeric duration: {}", value)))
}
