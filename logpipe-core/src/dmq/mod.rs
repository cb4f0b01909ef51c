pub mod redis_queue;

use chrono::{DateTime, Utc};
use logpipe_model::LogRecord;

pub use redis_queue::RedisQueue;

/// An entry handed back by `ReadGroup`: the delivered record plus enough
/// bookkeeping to ack or requeue it later.
#[derive(Debug, Clone)]
pub struct ReadEntry {
    pub ingest_id: i64,
    pub record: LogRecord,
    pub delivered_at: DateTime<Utc>,
}

/// An entry handed back by `Claim`/`auto_claim`: same shape as `ReadEntry`
/// plus the delivery count Redis tracked for it.
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub ingest_id: i64,
    pub record: LogRecord,
    pub delivery_count: u64,
}
