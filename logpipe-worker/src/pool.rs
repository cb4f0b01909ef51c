use std::sync::Arc;

use logpipe_config::WorkerConfig;
use logpipe_core::{DurableQueue, LogStore, Metrics, Shutdown};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::worker::Worker;

/// Owns the `N` workers that share the `log_workers` consumer group, plus
/// the handles of their spawned tasks (spec §4.3, §6 "worker pool size").
/// Each worker gets a distinct `consumer_id` derived from the configured
/// base id so Redis can tell them apart; the claim sweep runs once per
/// worker, not once per pool, since `auto_claim` is scoped per-consumer
/// (each consumer reclaims idle work for itself).
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Builds `count` workers, each with recovery already run, ready to be
    /// started with `spawn`.
    pub async fn build(
        count: usize,
        dmq: Arc<dyn DurableQueue>,
        pls: Arc<dyn LogStore>,
        base_config: WorkerConfig,
        metrics: Metrics,
    ) -> logpipe_model::Result<Self> {
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let mut config = base_config.clone();
            config.consumer_id = format!("{}-{i}", base_config.consumer_id);
            let worker = Arc::new(Worker::new(
                dmq.clone(),
                pls.clone(),
                config,
                metrics.clone(),
            ));
            worker.recover().await?;
            workers.push(worker);
        }
        Ok(Self {
            workers,
            handles: Vec::new(),
        })
    }

    /// Spawns the read loop and claim sweep for every worker. Returns
    /// immediately; tasks run until `shutdown` fires.
    pub fn spawn(&mut self, shutdown: &Shutdown) {
        for worker in &self.workers {
            let w = worker.clone();
            let rx = shutdown.subscribe();
            info!(consumer_id = w.consumer_id(), "starting worker");
            self.handles.push(tokio::spawn(async move {
                w.run(rx).await;
            }));

            let w = worker.clone();
            let rx = shutdown.subscribe();
            self.handles.push(tokio::spawn(async move {
                w.run_claim_sweep(rx).await;
            }));
        }
    }

    /// Awaits every spawned task, logging (but not propagating) a panic in
    /// any individual worker task so the rest of the pool keeps draining.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }
    }
}
