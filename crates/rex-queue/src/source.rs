//! Request consumption seam.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::queue::{ExportQueue, StreamMessage};

/// Where export requests come from.
///
/// Every entry returned by [`RequestSource::read_one`] stays pending until it
/// is acknowledged.
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Prepare the source. Failure here is fatal to the worker.
    async fn init(&self) -> QueueResult<()>;

    /// Wait a bounded time for one new entry.
    async fn read_one(&self) -> QueueResult<Option<StreamMessage>>;

    /// Acknowledge an entry returned by `read_one`.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;
}

#[async_trait]
impl RequestSource for ExportQueue {
    async fn init(&self) -> QueueResult<()> {
        ExportQueue::init(self).await
    }

    async fn read_one(&self) -> QueueResult<Option<StreamMessage>> {
        ExportQueue::read_one(self).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        ExportQueue::ack(self, message_id).await
    }
}
