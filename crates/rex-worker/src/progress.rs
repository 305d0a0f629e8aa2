//! Ordered, non-blocking progress publication.
//!
//! Reporters push onto an unbounded channel; a single forwarding task drains
//! it into the [`EventSink`] so events keep their order and subprocess
//! readers never wait on Redis.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rex_models::{JobId, ProgressEvent};
use rex_queue::EventSink;

/// Handle used by the pipeline to report progress for one job.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn report(&self, progress: u8, message: impl Into<String>) {
        let event = ProgressEvent::new(&self.job_id, progress, message);
        if self.tx.send(event).is_err() {
            debug!("Progress forwarder gone, dropping event for job {}", self.job_id);
        }
    }

    /// Callback for the encoder runner.
    pub fn encode_callback(&self) -> impl Fn(u8) + Send + 'static {
        let reporter = self.clone();
        move |pct| reporter.report(pct, "encoding")
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

/// The draining side of a job's progress channel.
pub struct ProgressForwarder {
    handle: JoinHandle<usize>,
}

impl ProgressForwarder {
    /// Wait until every reported event has been handed to the sink.
    ///
    /// Completes once all [`ProgressReporter`] clones are dropped. Returns
    /// how many events were published successfully.
    pub async fn flush(self) -> usize {
        match self.handle.await {
            Ok(published) => published,
            Err(e) => {
                warn!("Progress forwarder failed: {}", e);
                0
            }
        }
    }
}

/// Open the progress channel for a job.
pub fn progress_channel(
    job_id: &JobId,
    sink: Arc<dyn EventSink>,
) -> (ProgressReporter, ProgressForwarder) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

    let handle = tokio::spawn(async move {
        let mut published = 0;
        while let Some(event) = rx.recv().await {
            match sink.publish_progress(&event).await {
                Ok(()) => published += 1,
                Err(e) => warn!(
                    job_id = %event.job_id,
                    "Failed to publish progress {}%: {}", event.progress, e
                ),
            }
        }
        published
    });

    (
        ProgressReporter {
            job_id: job_id.clone(),
            tx,
        },
        ProgressForwarder { handle },
    )
}
