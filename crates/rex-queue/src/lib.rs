//! Redis Streams plumbing for the export worker.
//!
//! This crate provides:
//! - Consumer group creation and blocking single-entry reads
//! - Explicit per-entry acknowledgment
//! - Progress and result publication onto their own streams

pub mod error;
pub mod events;
pub mod queue;
pub mod source;

pub use error::{QueueError, QueueResult};
pub use events::{xadd_command, EventSink};
pub use queue::{ExportQueue, QueueConfig, StreamMessage};
pub use source::RequestSource;
