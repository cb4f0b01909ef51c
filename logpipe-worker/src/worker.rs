use std::sync::Arc;
use std::time::Duration;

use logpipe_config::WorkerConfig;
use logpipe_core::{ClaimedEntry, DurableQueue, InsertOutcome, LogStore, Metrics, ReadEntry};
use logpipe_model::{LogRecord, PipelineError, Result};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// A single consumer in the shared `log_workers` group (spec §4.3). Workers
/// share no in-process state with each other — all coordination is via the
/// DMQ's consumer-group protocol.
pub struct Worker {
    consumer_id: String,
    dmq: Arc<dyn DurableQueue>,
    pls: Arc<dyn LogStore>,
    config: WorkerConfig,
    metrics: Metrics,
}

impl Worker {
    pub fn new(
        dmq: Arc<dyn DurableQueue>,
        pls: Arc<dyn LogStore>,
        config: WorkerConfig,
        metrics: Metrics,
    ) -> Self {
        let consumer_id = config.consumer_id.clone();
        Self {
            consumer_id,
            dmq,
            pls,
            config,
            metrics,
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Recovery protocol run once at startup (spec §4.3): ensure the group
    /// exists, then reclaim this consumer's own crash-pending work (a
    /// previous process instance with the same `consumer_id` may have read
    /// a batch but never acked it before dying).
    pub async fn recover(&self) -> Result<()> {
        self.dmq.ensure_group().await?;

        let own_pending = self
            .dmq
            .pending_entry_ids(&self.consumer_id, self.config.batch_size)
            .await?;

        if !own_pending.is_empty() {
            info!(
                consumer_id = %self.consumer_id,
                count = own_pending.len(),
                "reclaiming own crash-pending entries"
            );
            let claimed = self
                .dmq
                .claim(&self.consumer_id, Duration::ZERO, &own_pending)
                .await?;
            self.process_claimed(claimed).await;
        }

        Ok(())
    }

    /// Runs the read → collate → persist → acknowledge loop until `shutdown`
    /// fires, at which point the in-flight batch is finished (persisted and
    /// acked) before the loop exits without starting a new read (spec §5
    /// cooperative shutdown).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let read = self.dmq.read_group(
                &self.consumer_id,
                self.config.batch_size,
                self.config.read_block,
            );

            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(consumer_id = %self.consumer_id, "shutdown signal received, exiting worker loop");
                    return;
                }
                result = read => {
                    match result {
                        Ok(entries) if entries.is_empty() => continue,
                        Ok(entries) => self.process_batch(entries).await,
                        Err(e) => {
                            warn!(consumer_id = %self.consumer_id, error = %e, "read_group failed, backing off");
                            tokio::time::sleep(self.config.retry_base_backoff).await;
                        }
                    }
                }
            }
        }
    }

    /// Periodic sweep that reclaims entries idle past `claim_idle_threshold`
    /// from any consumer in the group, including dead ones (spec §4.3
    /// failover primitive). Runs until `shutdown` fires.
    pub async fn run_claim_sweep(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.claim_sweep_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    match self
                        .dmq
                        .auto_claim(&self.consumer_id, self.config.claim_idle_threshold, self.config.batch_size)
                        .await
                    {
                        Ok(claimed) if claimed.is_empty() => {}
                        Ok(claimed) => {
                            info!(consumer_id = %self.consumer_id, count = claimed.len(), "claimed idle entries");
                            self.process_claimed(claimed).await;
                        }
                        Err(e) => warn!(error = %e, "claim sweep failed"),
                    }
                }
            }
        }
    }

    async fn process_claimed(&self, claimed: Vec<ClaimedEntry>) {
        if claimed.is_empty() {
            return;
        }
        let entries: Vec<ReadEntry> = claimed
            .into_iter()
            .map(|c| ReadEntry {
                ingest_id: c.ingest_id,
                record: c.record,
                delivered_at: chrono::Utc::now(),
            })
            .collect();
        self.process_batch(entries).await;
    }

    async fn process_batch(&self, entries: Vec<ReadEntry>) {
        let span = info_span!("worker_batch", consumer_id = %self.consumer_id, batch_len = entries.len());
        async {
            self.metrics
                .worker_batch_size
                .with_label_values(&[self.consumer_id.as_str()])
                .observe(entries.len() as f64);

            // Collate: insertion order is preserved to the PLS (spec §4.3
            // "group by nothing"); no suspension happens mid-insert.
            let mut records: Vec<LogRecord> = Vec::with_capacity(entries.len());
            let mut ingest_ids: Vec<i64> = Vec::with_capacity(entries.len());
            for entry in entries {
                let mut record = entry.record;
                record.ingest_id = Some(entry.ingest_id);
                ingest_ids.push(entry.ingest_id);
                records.push(record);
            }

            self.persist_and_ack(records, ingest_ids).await;
        }
        .instrument(span)
        .await;
    }

    async fn persist_and_ack(&self, records: Vec<LogRecord>, ingest_ids: Vec<i64>) {
        let mut attempt = 0u32;
        loop {
            match self.pls.batch_insert(&records).await {
                Ok(inserted) => {
                    if let Err(e) = self.dmq.ack(&ingest_ids).await {
                        // Commit succeeded but ack failed: the entries stay
                        // PENDING_FOR(self) and will be acked on the next
                        // read of the same records (idempotent insert makes
                        // the re-delivery a no-op, spec §5 ordering
                        // guarantee (4)).
                        error!(error = %e, batch_len = records.len(), "ack failed after commit; will retry on redelivery");
                        return;
                    }
                    self.metrics
                        .worker_processed_total
                        .with_label_values(&["committed"])
                        .inc_by(inserted);
                    debug!(inserted, batch_len = records.len(), "batch committed and acked");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.config.retry_budget => {
                    attempt += 1;
                    let backoff = jittered_backoff(self.config.retry_base_backoff, attempt);
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis(), "transient PLS error, retrying batch");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(PipelineError::TransientBackend(msg)) => {
                    error!(batch_len = records.len(), error = %msg, "retry budget exhausted, leaving batch unacked for replay");
                    return;
                }
                Err(PipelineError::BackendUnavailable(msg)) => {
                    // PLS outage, not a bad record: leave the batch unacked
                    // so it is redelivered once the store recovers. Acking
                    // here would silently drop data for the duration of the
                    // outage.
                    error!(batch_len = records.len(), error = %msg, "PLS unavailable, leaving batch unacked for replay");
                    return;
                }
                Err(PipelineError::Fatal(msg)) => {
                    error!(batch_len = records.len(), error = %msg, "fatal backend error, leaving batch unacked for replay");
                    return;
                }
                Err(PipelineError::PermanentRecord(_)) | Err(PipelineError::Validation(_)) => {
                    // Persistent per-record error: fall back to per-record
                    // inserts to quarantine the offending record(s); ack the
                    // rest (including quarantined ones, to prevent infinite
                    // replay per spec §4.3).
                    self.quarantine_and_ack(records, ingest_ids).await;
                    return;
                }
            }
        }
    }

    async fn quarantine_and_ack(&self, records: Vec<LogRecord>, ingest_ids: Vec<i64>) {
        let mut acked = Vec::with_capacity(ingest_ids.len());
        for (record, ingest_id) in records.into_iter().zip(ingest_ids) {
            match self.pls.insert_one(&record).await {
                Ok(InsertOutcome::Inserted) | Ok(InsertOutcome::DuplicateIgnored) => {
                    self.metrics
                        .worker_processed_total
                        .with_label_values(&["committed"])
                        .inc();
                    acked.push(ingest_id);
                }
                Err(e) => {
                    error!(
                        ingest_id,
                        device_id = %record.device_id,
                        error = %e,
                        "quarantining record: permanent insert failure"
                    );
                    self.metrics
                        .worker_processed_total
                        .with_label_values(&["quarantined"])
                        .inc();
                    // Acked anyway: at-least-once delivery must not become
                    // infinite replay of a record the PLS will never accept.
                    acked.push(ingest_id);
                }
            }
        }

        if let Err(e) = self.dmq.ack(&acked).await {
            error!(error = %e, count = acked.len(), "failed to ack quarantine batch");
        }
    }
}

fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(8));
    let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 2 + 1);
    exp + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_config::WorkerConfig;
    use logpipe_core::dmq::ClaimedEntry;
    use logpipe_core::InsertOutcome;
    use logpipe_model::queue::ConsumerStats;
    use logpipe_model::LogLevel;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeQueue {
        acked: Mutex<Vec<i64>>,
    }

    impl FakeQueue {
        fn new() -> Self {
            Self {
                acked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DurableQueue for FakeQueue {
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
            _ingest_ids: &[i64],
        ) -> Result<Vec<ClaimedEntry>> {
            Ok(Vec::new())
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
            Ok(Vec::new())
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

    /// A `LogStore` whose `batch_insert` can be scripted to fail a fixed
    /// number of times before succeeding, and whose `insert_one` rejects a
    /// single chosen device id permanently (simulating a poison record).
    struct FakeStore {
        batch_failures_remaining: AtomicU32,
        poison_device: Option<String>,
        backend_unavailable: bool,
        inserted: Mutex<Vec<LogRecord>>,
    }

    #[async_trait::async_trait]
    impl LogStore for FakeStore {
        async fn batch_insert(&self, records: &[LogRecord]) -> Result<u64> {
            if self.batch_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.batch_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::TransientBackend("connection reset".into()));
            }
            if self.backend_unavailable {
                return Err(PipelineError::BackendUnavailable("pool exhausted".into()));
            }
            if self.poison_device.is_some() {
                return Err(PipelineError::PermanentRecord("bad encoding".into()));
            }
            self.inserted.lock().unwrap().extend_from_slice(records);
            Ok(records.len() as u64)
        }

        async fn insert_one(&self, record: &LogRecord) -> Result<InsertOutcome> {
            if self.poison_device.as_deref() == Some(record.device_id.as_str()) {
                return Err(PipelineError::PermanentRecord("bad encoding".into()));
            }
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

    fn record(device_id: &str) -> LogRecord {
        LogRecord {
            device_id: device_id.into(),
            log_level: LogLevel::Info,
            message: "hello".into(),
            timestamp: chrono::Utc::now(),
            log_data: None,
            ingest_id: None,
        }
    }

    fn test_worker(dmq: Arc<dyn DurableQueue>, pls: Arc<dyn LogStore>) -> Worker {
        let mut config = WorkerConfig::default();
        config.retry_base_backoff = Duration::from_millis(1);
        config.retry_budget = 3;
        Worker::new(dmq, pls, config, Metrics::new())
    }

    #[tokio::test]
    async fn commits_and_acks_a_clean_batch() {
        let dmq = Arc::new(FakeQueue::new());
        let store = Arc::new(FakeStore {
            batch_failures_remaining: AtomicU32::new(0),
            poison_device: None,
            backend_unavailable: false,
            inserted: Mutex::new(Vec::new()),
        });
        let worker = test_worker(dmq.clone(), store.clone());

        worker
            .persist_and_ack(vec![record("d1"), record("d2")], vec![10, 11])
            .await;

        assert_eq!(store.inserted.lock().unwrap().len(), 2);
        assert_eq!(*dmq.acked.lock().unwrap(), vec![10, 11]);
    }

    #[tokio::test]
    async fn retries_transient_failures_within_budget_then_commits() {
        let dmq = Arc::new(FakeQueue::new());
        let store = Arc::new(FakeStore {
            batch_failures_remaining: AtomicU32::new(2),
            poison_device: None,
            backend_unavailable: false,
            inserted: Mutex::new(Vec::new()),
        });
        let worker = test_worker(dmq.clone(), store.clone());

        worker
            .persist_and_ack(vec![record("d1")], vec![1])
            .await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert_eq!(*dmq.acked.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_leaves_batch_unacked() {
        let dmq = Arc::new(FakeQueue::new());
        let store = Arc::new(FakeStore {
            batch_failures_remaining: AtomicU32::new(10),
            poison_device: None,
            backend_unavailable: false,
            inserted: Mutex::new(Vec::new()),
        });
        let worker = test_worker(dmq.clone(), store.clone());

        worker
            .persist_and_ack(vec![record("d1")], vec![1])
            .await;

        assert!(dmq.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pls_outage_leaves_batch_unacked_instead_of_quarantining() {
        let dmq = Arc::new(FakeQueue::new());
        let store = Arc::new(FakeStore {
            batch_failures_remaining: AtomicU32::new(0),
            poison_device: None,
            backend_unavailable: true,
            inserted: Mutex::new(Vec::new()),
        });
        let worker = test_worker(dmq.clone(), store.clone());

        worker
            .persist_and_ack(vec![record("d1")], vec![1])
            .await;

        // A PLS outage must never be treated as a poison record: the batch
        // stays unacked so it is redelivered once the store recovers,
        // instead of being quarantined and dropped.
        assert!(store.inserted.lock().unwrap().is_empty());
        assert!(dmq.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quarantines_poison_record_and_acks_whole_batch() {
        let dmq = Arc::new(FakeQueue::new());
        let store = Arc::new(FakeStore {
            batch_failures_remaining: AtomicU32::new(0),
            poison_device: Some("bad-device".into()),
            backend_unavailable: false,
            inserted: Mutex::new(Vec::new()),
        });
        let worker = test_worker(dmq.clone(), store.clone());

        worker
            .persist_and_ack(
                vec![record("good-device"), record("bad-device")],
                vec![1, 2],
            )
            .await;

        // The permanent-record branch falls back to per-record inserts:
        // the good record lands, the bad one is dropped, both are acked.
        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        let mut acked = dmq.acked.lock().unwrap().clone();
        acked.sort();
        assert_eq!(acked, vec![1, 2]);
    }
}
