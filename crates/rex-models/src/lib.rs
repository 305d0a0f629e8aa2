//! Shared data models for the replay export worker.
//!
//! This crate provides Serde-serializable types for:
//! - Export requests read off the request stream
//! - Progress and terminal result events
//! - The closed set of error codes surfaced to the backend
//! - Wire and encoding constants

pub mod encoding;
pub mod error_code;
pub mod job;
pub mod progress;
pub mod result;

// Re-export common types
pub use error_code::ErrorCode;
pub use job::{DecodeDefaults, DecodeError, ExportJobMessage, ExportType, JobId};
pub use progress::ProgressEvent;
pub use result::ExportResult;

/// Schema version stamped on every progress and result entry.
pub const SCHEMA_VERSION: &str = "1";
