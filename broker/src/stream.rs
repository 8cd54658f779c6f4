//! Append-only observation stream and its consumer group.

use common::keys;
use common::model::Observation;
use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{self, AsyncCommands, FromRedisValue};
use deadpool_redis::Pool;
use errors::{Result, StreamError};
use log::debug;
use metrics::counter;
use std::collections::HashMap;

/// One delivered stream entry: the broker id plus the raw field map.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
pub struct StreamProducer {
    pool: Pool,
    stream_key: String,
}

impl StreamProducer {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            stream_key: keys::RAW_STREAM.to_string(),
        }
    }

    /// Appends one observation as a single entry. Returns the entry id.
    pub async fn append(&self, observation: &Observation) -> Result<String> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StreamError::AppendFailed(e.into()))?;

        let fields = observation.to_fields();
        let id: String = conn
            .xadd(&self.stream_key, "*", &fields)
            .await
            .map_err(|e| StreamError::AppendFailed(e.into()))?;

        counter!("stream_append_total").increment(1);
        Ok(id)
    }
}

#[derive(Clone)]
pub struct StreamConsumer {
    pool: Pool,
    stream_key: String,
    group: String,
    consumer: String,
}

impl StreamConsumer {
    pub fn new(pool: Pool, consumer: impl Into<String>) -> Self {
        Self {
            pool,
            stream_key: keys::RAW_STREAM.to_string(),
            group: keys::CONSUMER_GROUP.to_string(),
            consumer: consumer.into(),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Creates the consumer group at stream origin, creating the stream
    /// itself if needed. An already-existing group is not an error; anything
    /// else is.
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StreamError::GroupCreateFailed(e.into()))?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                debug!("Created consumer group {} on {}", self.group, self.stream_key);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(StreamError::GroupCreateFailed(e.into()).into()),
        }
    }

    /// This consumer's previously delivered but unacknowledged entries.
    /// Empty result means the pending list is drained.
    pub async fn read_pending(&self, count: usize) -> Result<Vec<StreamEntry>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);
        self.read_with(&opts, "0").await
    }

    /// New, never-delivered entries; blocks up to `block_ms`.
    pub async fn read_new(&self, count: usize, block_ms: usize) -> Result<Vec<StreamEntry>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(block_ms);
        self.read_with(&opts, ">").await
    }

    async fn read_with(&self, opts: &StreamReadOptions, id: &str) -> Result<Vec<StreamEntry>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StreamError::ReadFailed(e.into()))?;

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[id], opts)
            .await
            .map_err(|e| StreamError::ReadFailed(e.into()))?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let mut fields = HashMap::with_capacity(stream_id.map.len());
                for (name, value) in &stream_id.map {
                    if let Ok(text) = String::from_redis_value(value) {
                        fields.insert(name.clone(), text);
                    }
                }
                entries.push(StreamEntry {
                    id: stream_id.id,
                    fields,
                });
            }
        }
        Ok(entries)
    }

    /// Acknowledges one processed entry.
    pub async fn ack(&self, entry_id: &str) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StreamError::AckFailed(e.into()))?;

        let _: u64 = conn
            .xack(&self.stream_key, &self.group, &[entry_id])
            .await
            .map_err(|e| StreamError::AckFailed(e.into()))?;

        counter!("stream_ack_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_addresses_contract_keys() {
        let pool = crate::connector::create_pool("redis://127.0.0.1:6379").unwrap();
        let consumer = StreamConsumer::new(pool, "processor-1");
        assert_eq!(consumer.stream_key, "weather:raw");
        assert_eq!(consumer.consumer_name(), "processor-1");
    }
}
