#![deny(unreachable_patterns)]
//! Process wrappers for replay exports.
//!
//! This crate provides:
//! - Encoder plan resolution with hardware fallback
//! - Type-safe FFmpeg command building and a runner with deadlines
//! - Progress parsing from `-progress pipe:1`
//! - FFprobe structural validation and raw frame sampling
//! - The resource-limited native helper bridge
//! - Artifact finalization (rename, checksum)

pub mod bridge;
pub mod command;
pub mod encoder_plan;
pub mod error;
pub mod frames;
pub mod fs_utils;
pub mod helper;
pub mod hwaccel;
pub mod log_tail;
pub mod probe;
pub mod progress;
pub mod validation;

pub use bridge::NativeBridge;
pub use command::{check_program, FfmpegCommand, FfmpegRunner, ToolPaths};
pub use encoder_plan::{Accelerator, EncoderConfig, EncoderPlan, FallbackNote};
pub use error::{MediaError, MediaResult};
pub use frames::{extract_frame, extract_sample_pair, RawFrame};
pub use helper::{plan_helper_command, HelperCommandPlan, HelperLimits, WrapperTools};
pub use hwaccel::EncoderCache;
pub use log_tail::LogTail;
pub use probe::{probe_file, validate_probe_output, ProbeResult};
pub use progress::FfmpegProgress;
pub use validation::assert_non_trivial_diff_score;
