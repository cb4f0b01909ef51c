use std::time::Duration;

use async_trait::async_trait;
use logpipe_model::{LogRecord, Result};

use crate::dmq::{ClaimedEntry, ReadEntry};
use logpipe_model::queue::ConsumerStats;

/// The Durable Message Queue contract (spec §4.2): an append-only persistent
/// stream with consumer-group delivery, plus a short-TTL key/value cache
/// namespace. Durable operations (`append`, `ack`, `claim`) are fail-closed;
/// cache operations are fail-open (callers degrade to the PLS on error).
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append a record, returning the queue-assigned monotonic `ingest_id`.
    /// Durable before returning.
    async fn append(&self, record: &LogRecord) -> Result<i64>;

    /// Idempotently create the consumer group if it does not already exist.
    async fn ensure_group(&self) -> Result<()>;

    /// Assign up to `count` undelivered entries to `consumer`, blocking up
    /// to `block_for` if fewer than `count` are immediately available.
    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block_for: Duration,
    ) -> Result<Vec<ReadEntry>>;

    /// Remove entries from the group's pending list. Acks for non-pending
    /// ids are no-ops.
    async fn ack(&self, ingest_ids: &[i64]) -> Result<()>;

    /// Transfer pending entries idle longer than `min_idle` to `new_consumer`.
    /// This is the failover primitive (spec §4.2/§4.3 recovery protocol).
    async fn claim(
        &self,
        new_consumer: &str,
        min_idle: Duration,
        ingest_ids: &[i64],
    ) -> Result<Vec<ClaimedEntry>>;

    /// Auto-discover and claim any entries across the whole group idle
    /// longer than `min_idle`, up to `count` entries, without the caller
    /// needing to know their ids in advance (used by the periodic sweep).
    async fn auto_claim(
        &self,
        new_consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<ClaimedEntry>>;

    /// Per-consumer pending counts and idle times.
    async fn pending_summary(&self) -> Result<Vec<ConsumerStats>>;

    /// ids currently pending for `consumer`, regardless of idle time. Used
    /// at worker startup to reclaim a consumer's own crash-pending work
    /// (spec §4.3 recovery protocol "self-claim"), distinct from the
    /// idle-threshold sweep that reclaims from other, apparently-dead
    /// consumers.
    async fn pending_entry_ids(&self, consumer: &str, count: usize) -> Result<Vec<i64>>;

    /// Current stream length.
    async fn length(&self) -> Result<u64>;

    /// Trim entries with id below `min_id`.
    async fn trim(&self, min_id: i64) -> Result<u64>;

    /// Fail-open cache read; a miss or cache outage both return `Ok(None)`.
    async fn cache_get(&self, key: &str) -> Option<String>;

    /// Fail-open cache write with a TTL; failures are swallowed (logged).
    async fn cache_set_ex(&self, key: &str, value: &str, ttl: Duration);

    /// Fail-open cache delete.
    async fn cache_del(&self, key: &str);

    /// Trivial round-trip used by `Health()`.
    async fn ping(&self) -> Result<()>;
}

/// The Persistent Log Store contract (spec §4.4): batched insert, indexed
/// query by device, and a count operation, each bound to a single acquired
/// connection-pool session and an explicit transaction.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert all records of a batch in one transaction. Conflicts on
    /// `ingest_id` are no-ops (idempotency via unique index, spec §4.3).
    /// Returns the number of rows actually inserted (excludes conflicts).
    async fn batch_insert(&self, records: &[LogRecord]) -> Result<u64>;

    /// Insert records individually in a fresh transaction each, returning
    /// per-record outcomes. Used to quarantine the offending record(s) of
    /// an otherwise-failing batch (spec §4.3 "Handle failure").
    async fn insert_one(&self, record: &LogRecord) -> Result<InsertOutcome>;

    /// Most recent records for a device, ordered by timestamp descending.
    async fn query_recent(&self, device_id: &str, limit: u32) -> Result<Vec<LogRecord>>;

    /// Total row count.
    async fn count(&self) -> Result<u64>;

    /// Trivial round-trip used by `Health()`.
    async fn ping(&self) -> Result<()>;
}

/// Outcome of a single-record insert attempt, distinguishing a genuine
/// duplicate (idempotent no-op, still "successful" to the caller) from a
/// newly inserted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateIgnored,
}
