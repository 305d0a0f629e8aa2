//! Export request definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::encoding::DEFAULT_DURATION_MILLIS;

/// Unique identifier for an export job, assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of artifact requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportType {
    /// Full replay video
    Mp4,
    /// Single still frame
    Thumbnail,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Mp4 => "MP4",
            ExportType::Thumbnail => "THUMBNAIL",
        }
    }

    /// Parse the wire value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MP4" => Some(ExportType::Mp4),
            "THUMBNAIL" => Some(ExportType::Thumbnail),
            _ => None,
        }
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ExportType::Mp4 => "mp4",
            ExportType::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while decoding a request entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Worker-side defaults applied while decoding.
#[derive(Debug, Clone)]
pub struct DecodeDefaults {
    /// Storage root for exports
    pub storage_root: PathBuf,
    /// Export subdirectory below the storage root
    pub export_dir: String,
    /// Forces hardware preference on for every job when set
    pub prefer_hw: bool,
}

impl Default for DecodeDefaults {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/tmp/codexpong-storage"),
            export_dir: "exports".to_string(),
            prefer_hw: false,
        }
    }
}

/// One export request as read off the request stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobMessage {
    /// Job ID
    pub job_id: JobId,
    /// Replay being exported
    pub replay_id: String,
    /// Owner of the replay
    pub owner_id: String,
    /// Requested artifact
    #[serde(rename = "type")]
    pub export_type: ExportType,
    /// Replay event log location (carried through, not read here)
    #[serde(default)]
    pub event_path: String,
    /// Directory receiving the artifact
    pub output_dir: PathBuf,
    /// Length of the replay in milliseconds
    pub duration_millis: u64,
    /// Try hardware encoders first
    #[serde(default)]
    pub prefer_hw: bool,
}

impl ExportJobMessage {
    /// Decode a flat stream entry.
    ///
    /// `jobId`, `replayId`, `ownerId` and `type` are required. `outputDir`
    /// defaults to `<storage_root>/<export_dir>/<ownerId>/<replayId>` and
    /// `durationMillis` to 5000.
    pub fn from_fields(
        fields: &HashMap<String, String>,
        defaults: &DecodeDefaults,
    ) -> Result<Self, DecodeError> {
        let job_id = required(fields, "jobId")?;
        let replay_id = required(fields, "replayId")?;
        let owner_id = required(fields, "ownerId")?;

        let raw_type = required(fields, "type")?;
        let export_type = ExportType::parse(&raw_type).ok_or(DecodeError::InvalidField {
            field: "type",
            value: raw_type.clone(),
        })?;

        let output_dir = match optional(fields, "outputDir") {
            Some(dir) => PathBuf::from(dir),
            None => defaults
                .storage_root
                .join(&defaults.export_dir)
                .join(&owner_id)
                .join(&replay_id),
        };

        let duration_millis = match optional(fields, "durationMillis") {
            Some(raw) => parse_duration(&raw).ok_or(DecodeError::InvalidField {
                field: "durationMillis",
                value: raw,
            })?,
            None => DEFAULT_DURATION_MILLIS,
        };

        let prefer_hw = optional(fields, "preferHw")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
            || defaults.prefer_hw;

        Ok(Self {
            job_id: JobId(job_id),
            replay_id,
            owner_id,
            export_type,
            event_path: optional(fields, "eventPath").unwrap_or_default(),
            output_dir,
            duration_millis,
            prefer_hw,
        })
    }

    /// Encode as a flat stream entry.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("jobId", self.job_id.to_string()),
            ("replayId", self.replay_id.clone()),
            ("ownerId", self.owner_id.clone()),
            ("type", self.export_type.as_str().to_string()),
            ("eventPath", self.event_path.clone()),
            ("outputDir", self.output_dir.to_string_lossy().to_string()),
            ("durationMillis", self.duration_millis.to_string()),
            ("preferHw", self.prefer_hw.to_string()),
        ]
    }
}

fn required(fields: &HashMap<String, String>, name: &'static str) -> Result<String, DecodeError> {
    optional(fields, name).ok_or(DecodeError::MissingField(name))
}

fn optional(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Backends sometimes send fractional milliseconds.
fn parse_duration(raw: &str) -> Option<u64> {
    if let Ok(ms) = raw.parse::<u64>() {
        return Some(ms);
    }
    let ms = raw.parse::<f64>().ok()?;
    (ms.is_finite() && ms >= 0.0).then(|| ms.round() as u64)
}
