use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use logpipe_model::queue::ConsumerStats;
use logpipe_model::{LogRecord, PipelineError, Result};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimOptions, StreamClaimReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, error, warn};

use crate::dmq::{ClaimedEntry, ReadEntry};
use crate::metrics::Metrics;
use crate::ports::DurableQueue;

/// Redis-Streams-backed implementation of the DMQ contract (spec §4.2).
///
/// `Append` assigns the entry's own monotonic `ingest_id` (via `INCR`) as the
/// literal Redis stream entry ID (`"<ingest_id>-0"`), so every other
/// operation can address entries by `ingest_id` alone without a secondary
/// id-mapping table.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    stream_name: String,
    group_name: String,
    max_len: Option<u64>,
    metrics: Metrics,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("stream_name", &self.stream_name)
            .field("group_name", &self.group_name)
            .finish()
    }
}

impl RedisQueue {
    pub async fn connect(
        redis_url: &str,
        stream_name: impl Into<String>,
        group_name: impl Into<String>,
        max_len: Option<u64>,
        metrics: Metrics,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::Fatal(format!("invalid DMQ endpoint: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            stream_name: stream_name.into(),
            group_name: group_name.into(),
            max_len,
            metrics,
        })
    }

    fn ingest_id_seq_key(&self) -> String {
        format!("{}:ingest_id_seq", self.stream_name)
    }

    fn entry_id(ingest_id: i64) -> String {
        format!("{ingest_id}-0")
    }

    fn parse_entry_id(id: &str) -> Option<i64> {
        id.split('-').next()?.parse().ok()
    }

    fn record_to_payload(record: &LogRecord) -> Result<String> {
        serde_json::to_string(record)
            .map_err(|e| PipelineError::Fatal(format!("record serialization failed: {e}")))
    }

    fn payload_to_record(payload: &str) -> Result<LogRecord> {
        serde_json::from_str(payload)
            .map_err(|e| PipelineError::PermanentRecord(format!("corrupt queue payload: {e}")))
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn append(&self, record: &LogRecord) -> Result<i64> {
        let mut conn = self.conn.clone();
        let ingest_id: i64 = conn.incr(self.ingest_id_seq_key(), 1).await?;
        let payload = Self::record_to_payload(record)?;
        let entry_id = Self::entry_id(ingest_id);

        let result: std::result::Result<String, RedisError> = match self.max_len {
            Some(max_len) => {
                conn.xadd_maxlen(
                    &self.stream_name,
                    redis::streams::StreamMaxlen::Approx(max_len as usize),
                    &entry_id,
                    &[("data", payload.as_str())],
                )
                .await
            }
            None => {
                conn.xadd(&self.stream_name, &entry_id, &[("data", payload.as_str())])
                    .await
            }
        };

        if let Err(e) = result {
            self.metrics
                .dmq_append_total
                .with_label_values(&["failure"])
                .inc();
            error!(error = %e, ingest_id, "DMQ append failed");
            return Err(PipelineError::from(e));
        }

        self.metrics
            .dmq_append_total
            .with_label_values(&["success"])
            .inc();
        debug!(ingest_id, "DMQ append succeeded");
        Ok(ingest_id)
    }

    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: std::result::Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream_name, &self.group_name, "0")
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => {
                error!(error = %e, "ensure_group failed");
                Err(PipelineError::from(e))
            }
        }
    }

    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block_for: Duration,
    ) -> Result<Vec<ReadEntry>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.group_name, consumer)
            .count(count)
            .block(block_for.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[self.stream_name.as_str()], &[">"], &opts)
            .await
            .map_err(|e| {
                error!(error = %e, consumer, "read_group failed");
                PipelineError::from(e)
            })?;

        let now = Utc::now();
        let mut out = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let ingest_id = match Self::parse_entry_id(&id.id) {
                    Some(v) => v,
                    None => {
                        warn!(entry_id = %id.id, "skipping unparseable stream entry id");
                        continue;
                    }
                };
                let payload: String = match id.get("data") {
                    Some(p) => p,
                    None => {
                        warn!(ingest_id, "stream entry missing 'data' field");
                        continue;
                    }
                };
                match Self::payload_to_record(&payload) {
                    Ok(record) => out.push(ReadEntry {
                        ingest_id,
                        record,
                        delivered_at: now,
                    }),
                    Err(e) => warn!(ingest_id, error = %e, "dropping unparseable queue entry"),
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, ingest_ids: &[i64]) -> Result<()> {
        if ingest_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = ingest_ids.iter().copied().map(Self::entry_id).collect();
        let _: u64 = conn
            .xack(&self.stream_name, &self.group_name, &ids)
            .await
            .map_err(|e| {
                error!(error = %e, count = ingest_ids.len(), "ack failed");
                PipelineError::from(e)
            })?;
        debug!(count = ingest_ids.len(), "acked entries");
        Ok(())
    }

    async fn claim(
        &self,
        new_consumer: &str,
        min_idle: Duration,
        ingest_ids: &[i64],
    ) -> Result<Vec<ClaimedEntry>> {
        if ingest_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = ingest_ids.iter().copied().map(Self::entry_id).collect();
        let opts = StreamClaimOptions::default();

        let reply: StreamClaimReply = conn
            .xclaim_options(
                &self.stream_name,
                &self.group_name,
                new_consumer,
                min_idle.as_millis() as usize,
                &ids,
                opts,
            )
            .await
            .map_err(|e| {
                error!(error = %e, new_consumer, "claim failed");
                PipelineError::from(e)
            })?;

        let mut out = Vec::new();
        for id in reply.ids {
            let ingest_id = match Self::parse_entry_id(&id.id) {
                Some(v) => v,
                None => continue,
            };
            let payload: Option<String> = id.get("data");
            if let Some(payload) = payload {
                if let Ok(record) = Self::payload_to_record(&payload) {
                    out.push(ClaimedEntry {
                        ingest_id,
                        record,
                        delivery_count: 1,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn auto_claim(
        &self,
        new_consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<ClaimedEntry>> {
        let mut conn = self.conn.clone();
        let (_cursor, entries, _deleted): (String, Vec<redis::streams::StreamId>, Vec<String>) =
            redis::cmd("XAUTOCLAIM")
                .arg(&self.stream_name)
                .arg(&self.group_name)
                .arg(new_consumer)
                .arg(min_idle.as_millis() as usize)
                .arg("0-0")
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!(error = %e, new_consumer, "auto_claim failed");
                    PipelineError::from(e)
                })?;

        let mut out = Vec::new();
        for id in entries {
            let ingest_id = match Self::parse_entry_id(&id.id) {
                Some(v) => v,
                None => continue,
            };
            if let Some(payload) = id.get::<String>("data") {
                if let Ok(record) = Self::payload_to_record(&payload) {
                    out.push(ClaimedEntry {
                        ingest_id,
                        record,
                        delivery_count: 1,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn pending_summary(&self) -> Result<Vec<ConsumerStats>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingReply = conn
            .xpending(&self.stream_name, &self.group_name)
            .await
            .map_err(|e| {
                error!(error = %e, "pending_summary failed");
                PipelineError::from(e)
            })?;

        let mut out = Vec::new();
        if let redis::streams::StreamPendingReply::Data(data) = reply {
            for consumer in data.consumers {
                out.push(ConsumerStats {
                    consumer_id: consumer.name,
                    pending_count: consumer.pending.parse().unwrap_or(0),
                    min_idle_ms: 0,
                    max_idle_ms: 0,
                });
            }
        }
        Ok(out)
    }

    async fn pending_entry_ids(&self, consumer: &str, count: usize) -> Result<Vec<i64>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_consumer_count(
                &self.stream_name,
                &self.group_name,
                "-",
                "+",
                count,
                consumer,
            )
            .await
            .map_err(|e| {
                error!(error = %e, consumer, "pending_entry_ids failed");
                PipelineError::from(e)
            })?;

        Ok(reply
            .ids
            .into_iter()
            .filter_map(|id| Self::parse_entry_id(&id.id))
            .collect())
    }

    async fn length(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.stream_name).await?;
        self.metrics.dmq_stream_length.set(len as i64);
        Ok(len)
    }

    async fn trim(&self, min_id: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(&self.stream_name)
            .arg("MINID")
            .arg(Self::entry_id(min_id))
            .query_async(&mut conn)
            .await?;
        Ok(trimmed)
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, key, "cache get failed (degrading to PLS)");
                None
            }
        }
    }

    async fn cache_set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, value, secs)
            .await
        {
            debug!(error = %e, key, "cache set failed (fail-open)");
        }
    }

    async fn cache_del(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            debug!(error = %e, key, "cache delete failed (fail-open)");
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_round_trips_through_parse() {
        for ingest_id in [0, 1, 42, i64::MAX] {
            let id = RedisQueue::entry_id(ingest_id);
            assert_eq!(id, format!("{ingest_id}-0"));
            assert_eq!(RedisQueue::parse_entry_id(&id), Some(ingest_id));
        }
    }

    #[test]
    fn parse_entry_id_rejects_malformed_ids() {
        assert_eq!(RedisQueue::parse_entry_id(""), None);
        assert_eq!(RedisQueue::parse_entry_id("not-a-number-0"), None);
    }

    #[test]
    fn record_payload_round_trips() {
        let record = LogRecord {
            device_id: "d1".into(),
            log_level: logpipe_model::LogLevel::Error,
            message: "boom".into(),
            timestamp: Utc::now(),
            log_data: Some(serde_json::json!({"k": "v"})),
            ingest_id: None,
        };
        let payload = RedisQueue::record_to_payload(&record).unwrap();
        let decoded = RedisQueue::payload_to_record(&payload).unwrap();
        assert_eq!(decoded.device_id, record.device_id);
        assert_eq!(decoded.message, record.message);
        assert_eq!(decoded.log_data, record.log_data);
    }

    #[test]
    fn payload_to_record_rejects_corrupt_json() {
        let err = RedisQueue::payload_to_record("not json").unwrap_err();
        assert!(matches!(err, PipelineError::PermanentRecord(_)));
    }
}
