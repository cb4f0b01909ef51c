use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A DMQ-level wrapper over a delivered-but-not-yet-acked `LogRecord`.
///
/// Exists iff the record has been delivered to some consumer but not yet
/// acknowledged (spec §3 invariant). Removed on `Ack`; may be trimmed from
/// the underlying stream after a retention bound past its ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub ingest_id: i64,
    pub delivery_count: u32,
    pub first_delivered_at: DateTime<Utc>,
    pub last_delivered_at: DateTime<Utc>,
    pub owning_consumer: String,
}

impl PendingEntry {
    /// How long this entry has sat unacknowledged with its current owner.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_delivered_at
    }

    /// Whether this entry is eligible for `Claim` by another consumer.
    pub fn is_claimable(&self, now: DateTime<Utc>, min_idle: chrono::Duration) -> bool {
        self.idle_for(now) >= min_idle
    }
}

/// Per-consumer pending counts and idle times, as returned by `PendingSummary`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsumerStats {
    pub consumer_id: String,
    pub pending_count: u64,
    pub min_idle_ms: i64,
    pub max_idle_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_delivered_at: DateTime<Utc>) -> PendingEntry {
        PendingEntry {
            ingest_id: 1,
            delivery_count: 1,
            first_delivered_at: last_delivered_at,
            last_delivered_at,
            owning_consumer: "c1".into(),
        }
    }

    #[test]
    fn claimable_past_threshold() {
        let now = Utc::now();
        let e = entry(now - chrono::Duration::seconds(61));
        assert!(e.is_claimable(now, chrono::Duration::seconds(60)));
    }

    #[test]
    fn not_claimable_below_threshold() {
        let now = Utc::now();
        let e = entry(now - chrono::Duration::seconds(10));
        assert!(!e.is_claimable(now, chrono::Duration::seconds(60)));
    }
}
