//! Export request consumption using Redis Streams consumer groups.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying export requests
    pub request_stream: String,
    /// Stream receiving progress events
    pub progress_stream: String,
    /// Stream receiving terminal results
    pub result_stream: String,
    /// Consumer group name
    pub consumer_group: String,
    /// This worker's name within the group
    pub consumer_name: String,
    /// How long one read blocks waiting for a message
    pub block_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            request_stream: "replay.export.request".to_string(),
            progress_stream: "replay.export.progress".to_string(),
            result_stream: "replay.export.result".to_string(),
            consumer_group: "export-worker".to_string(),
            consumer_name: format!("worker-{}", std::process::id()),
            block_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
            format!("redis://{}:6379", host)
        });

        Self {
            redis_url,
            request_stream: std::env::var("EXPORT_REQUEST_STREAM")
                .unwrap_or(defaults.request_stream),
            progress_stream: std::env::var("EXPORT_PROGRESS_STREAM")
                .unwrap_or(defaults.progress_stream),
            result_stream: std::env::var("EXPORT_RESULT_STREAM")
                .unwrap_or(defaults.result_stream),
            consumer_group: std::env::var("EXPORT_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("WORKER_CONSUMER_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.consumer_name),
            block_ms: std::env::var("WORKER_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.block_ms),
        }
    }
}

/// One request entry as delivered to this consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Stream entry ID, used for acknowledgment
    pub id: String,
    /// Flat field map of the entry
    pub fields: HashMap<String, String>,
}

/// Export queue client.
pub struct ExportQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl ExportQueue {
    /// Create a new export queue. Does not connect yet.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str()).map_err(|e| {
            QueueError::connection_failed(format!("invalid Redis URL {}: {}", config.redis_url, e))
        })?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    ///
    /// The group starts at `$`, so only requests added after its creation are
    /// delivered.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.request_stream)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if is_busy_group(&e) => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => {
                return Err(QueueError::GroupCreationFailed {
                    stream: self.config.request_stream.clone(),
                    group: self.config.consumer_group.clone(),
                    source: e,
                })
            }
        }

        Ok(())
    }

    /// Block up to `block_ms` for one new request.
    ///
    /// Returns `None` when the block interval elapses without a message.
    pub async fn read_one(&self) -> QueueResult<Option<StreamMessage>> {
        let mut conn = self.connection().await?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.config.request_stream)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        let message = reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .next()
            .map(|entry| StreamMessage {
                fields: entry_fields(&entry.id, entry.map),
                id: entry.id,
            });

        if let Some(message) = &message {
            debug!("Consumed entry {} from {}", message.id, self.config.request_stream);
        }

        Ok(message)
    }

    /// Acknowledge a request entry.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.request_stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged entry: {}", message_id);
        Ok(())
    }
}

fn is_busy_group(e: &redis::RedisError) -> bool {
    e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP")
}

/// Convert raw entry values to strings, dropping ones that are not text.
fn entry_fields(id: &str, map: HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| match redis::from_redis_value::<String>(&value) {
            Ok(text) => Some((key, text)),
            Err(e) => {
                warn!("Ignoring non-text field {} in entry {}: {}", key, id, e);
                None
            }
        })
        .collect()
}
