//! Job executor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rex_queue::{EventSink, ExportQueue, QueueResult, RequestSource};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handler::JobHandler;
use crate::pipeline::RenderPipeline;

/// Consumes the request stream one entry at a time.
pub struct JobExecutor {
    config: WorkerConfig,
    source: Arc<dyn RequestSource>,
    handler: JobHandler,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    /// Create an executor that reads from and publishes through `queue`.
    pub fn new(config: WorkerConfig, queue: ExportQueue, pipeline: RenderPipeline) -> Self {
        let queue_config = queue.config();
        info!(
            "Export worker '{}' consuming {} (group {})",
            queue_config.consumer_name, queue_config.request_stream, queue_config.consumer_group
        );

        let queue = Arc::new(queue);
        Self::with_source(config, queue.clone(), queue, pipeline)
    }

    /// Create an executor over any request source and event sink.
    pub fn with_source(
        config: WorkerConfig,
        source: Arc<dyn RequestSource>,
        sink: Arc<dyn EventSink>,
        pipeline: RenderPipeline,
    ) -> Self {
        let handler = JobHandler::new(pipeline, sink, config.decode_defaults());
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            source,
            handler,
            shutdown,
        }
    }

    /// Run until shutdown.
    ///
    /// Failing to create the consumer group is fatal. Later broker errors are
    /// logged and retried after a pause.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("Starting job executor");

        self.source.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            if let Err(e) = self.consume_one().await {
                error!("Error consuming requests: {}", e);
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Read, handle and acknowledge at most one entry.
    ///
    /// The entry is acknowledged whatever the job's outcome, since a result
    /// has already been published for it.
    async fn consume_one(&self) -> QueueResult<()> {
        let Some(message) = self.source.read_one().await? else {
            debug!("No request within the block interval");
            return Ok(());
        };

        let result = self.handler.handle(&message).await;
        info!("Entry {} finished with {}", message.id, result.status());

        if let Err(e) = self.source.ack(&message.id).await {
            warn!("Failed to ack entry {}: {}", message.id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Ask the run loop to stop after the current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
