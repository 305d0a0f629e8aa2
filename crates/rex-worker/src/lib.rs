//! Replay export worker.
//!
//! This crate provides:
//! - The request stream consumer loop with graceful shutdown
//! - Per-job rendering, validation and finalization
//! - Ordered progress emission and result publication
//! - Structured job logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod progress;

#[cfg(all(test, unix))]
mod testing;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use handler::JobHandler;
pub use logging::JobLogger;
pub use pipeline::{RenderOutcome, RenderPipeline};
pub use progress::{progress_channel, ProgressForwarder, ProgressReporter};
