//! Prometheus metrics for the export worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "rex_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "rex_jobs_failed_total";
    pub const ENCODER_FALLBACKS_TOTAL: &str = "rex_encoder_fallbacks_total";
    pub const JOB_DURATION_SECONDS: &str = "rex_job_duration_seconds";
}

/// Record job completed.
pub fn record_job_completed(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record job failed.
pub fn record_job_failed(job_type: &str, code: &str) {
    let labels = [("type", job_type.to_string()), ("code", code.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record an encoder attempt that ran as a degraded choice.
pub fn record_encoder_fallback(note: &str) {
    let labels = [("note", note.to_string())];
    counter!(names::ENCODER_FALLBACKS_TOTAL, &labels).increment(1);
}

/// Record wall time of one job, from decode to result.
pub fn record_job_duration(job_type: &str, duration_secs: f64) {
    let labels = [("type", job_type.to_string())];
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}
