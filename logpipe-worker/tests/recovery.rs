use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logpipe_config::WorkerConfig;
use logpipe_core::dmq::{ClaimedEntry, ReadEntry};
use logpipe_core::{DurableQueue, InsertOutcome, LogStore, Metrics};
use logpipe_model::queue::ConsumerStats;
use logpipe_model::{LogLevel, LogRecord, Result};
use logpipe_worker::Worker;

/// Exercises the startup self-claim path (spec §4.3 recovery protocol): a
/// worker restarting under its old `consumer_id` finds its own
/// crash-pending entries via `pending_entry_ids`, reclaims them with
/// `claim`, and commits+acks them through the normal batch path.
struct SelfClaimQueue {
    own_pending: Vec<i64>,
    claimed: Mutex<Vec<i64>>,
    acked: Mutex<Vec<i64>>,
}

#[async_trait]
impl DurableQueue for SelfClaimQueue {
    async fn append(&self, _record: &LogRecord) -> Result<i64> {
        Ok(1)
    }
    async fn ensure_group(&self) -> Result<()> {
        Ok(())
    }
    async fn read_group(
        &self,
        _consumer: &str,
        _count: usize,
        _block_for: Duration,
    ) -> Result<Vec<ReadEntry>> {
        Ok(Vec::new())
    }
    async fn ack(&self, ingest_ids: &[i64]) -> Result<()> {
        self.acked.lock().unwrap().extend_from_slice(ingest_ids);
        Ok(())
    }
    async fn claim(
        &self,
        _new_consumer: &str,
        _min_idle: Duration,
        ingest_ids: &[i64],
    ) -> Result<Vec<ClaimedEntry>> {
        self.claimed.lock().unwrap().extend_from_slice(ingest_ids);
        Ok(ingest_ids
            .iter()
            .map(|id| ClaimedEntry {
                ingest_id: *id,
                record: LogRecord {
                    device_id: "reclaimed".into(),
                    log_level: LogLevel::Warning,
                    message: "crash-pending".into(),
                    timestamp: chrono::Utc::now(),
                    log_data: None,
                    ingest_id: None,
                },
                delivery_count: 2,
            })
            .collect())
    }
    async fn auto_claim(
        &self,
        _new_consumer: &str,
        _min_idle: Duration,
        _count: usize,
    ) -> Result<Vec<ClaimedEntry>> {
        Ok(Vec::new())
    }
    async fn pending_summary(&self) -> Result<Vec<ConsumerStats>> {
        Ok(Vec::new())
    }
    async fn pending_entry_ids(&self, _consumer: &str, _count: usize) -> Result<Vec<i64>> {
        Ok(self.own_pending.clone())
    }
    async fn length(&self) -> Result<u64> {
        Ok(0)
    }
    async fn trim(&self, _min_id: i64) -> Result<u64> {
        Ok(0)
    }
    async fn cache_get(&self, _key: &str) -> Option<String> {
        None
    }
    async fn cache_set_ex(&self, _key: &str, _value: &str, _ttl: Duration) {}
    async fn cache_del(&self, _key: &str) {}
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct RecordingStore {
    inserted: Mutex<Vec<LogRecord>>,
}

#[async_trait]
impl LogStore for RecordingStore {
    async fn batch_insert(&self, records: &[LogRecord]) -> Result<u64> {
        self.inserted.lock().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }
    async fn insert_one(&self, record: &LogRecord) -> Result<InsertOutcome> {
        self.inserted.lock().unwrap().push(record.clone());
        Ok(InsertOutcome::Inserted)
    }
    async fn query_recent(&self, _device_id: &str, _limit: u32) -> Result<Vec<LogRecord>> {
        Ok(Vec::new())
    }
    async fn count(&self) -> Result<u64> {
        Ok(self.inserted.lock().unwrap().len() as u64)
    }
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn recover_reclaims_and_commits_own_pending_entries() {
    let dmq = Arc::new(SelfClaimQueue {
        own_pending: vec![7, 8],
        claimed: Mutex::new(Vec::new()),
        acked: Mutex::new(Vec::new()),
    });
    let store = Arc::new(RecordingStore {
        inserted: Mutex::new(Vec::new()),
    });

    let worker = Worker::new(
        dmq.clone(),
        store.clone(),
        WorkerConfig::default(),
        Metrics::new(),
    );

    worker.recover().await.unwrap();

    assert_eq!(*dmq.claimed.lock().unwrap(), vec![7, 8]);
    assert_eq!(store.inserted.lock().unwrap().len(), 2);
    let mut acked = dmq.acked.lock().unwrap().clone();
    acked.sort();
    assert_eq!(acked, vec![7, 8]);
}

#[tokio::test]
async fn recover_is_a_noop_when_nothing_pending() {
    let dmq = Arc::new(SelfClaimQueue {
        own_pending: Vec::new(),
        claimed: Mutex::new(Vec::new()),
        acked: Mutex::new(Vec::new()),
    });
    let store = Arc::new(RecordingStore {
        inserted: Mutex::new(Vec::new()),
    });

    let worker = Worker::new(
        dmq.clone(),
        store.clone(),
        WorkerConfig::default(),
        Metrics::new(),
    );

    worker.recover().await.unwrap();

    assert!(dmq.claimed.lock().unwrap().is_empty());
    assert!(store.inserted.lock().unwrap().is_empty());
}
