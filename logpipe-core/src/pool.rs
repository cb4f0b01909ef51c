use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use logpipe_config::PoolConfig;
use logpipe_model::{PipelineError, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

/// Wraps a `sqlx::PgPool` with the leak-detection diagnostic the PLS pool
/// contract requires (spec §4.4): every acquisition is timestamped, and
/// sessions held past the configured thresholds are counted and reported.
///
/// This is not optional instrumentation — the Worker Pool's correctness
/// argument depends on sessions being returned promptly, so a leak here is
/// a latent durability bug, not just an operational nuisance.
#[derive(Clone)]
pub struct TrackedPool {
    pool: PgPool,
    config: PoolConfig,
    outstanding: DashMap<Uuid, Instant>,
    acquire_failures: std::sync::Arc<AtomicU64>,
    metrics: Metrics,
}

impl std::fmt::Debug for TrackedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedPool")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .field("outstanding_tracked", &self.outstanding.len())
            .finish()
    }
}

/// A checked-out connection. Dropping it records how long it was held and
/// updates the leak-threshold counters; it derefs to `&PgPool` for callers
/// that just want to run a query against the pool's internal connection
/// management rather than holding a single physical connection (the
/// repositories below use `sqlx::query!(...).execute(pool)` directly, which
/// sqlx itself multiplexes onto pooled connections — this guard tracks the
/// *logical* hold time of one unit of work, matching how the pool contract
/// in spec §4.4 is phrased).
pub struct PoolLease<'a> {
    id: Uuid,
    started: Instant,
    pool: &'a TrackedPool,
}

impl<'a> Drop for PoolLease<'a> {
    fn drop(&mut self) {
        self.pool.outstanding.remove(&self.id);
        let held = self.started.elapsed();
        self.pool.metrics.pool_acquire_duration.observe(held.as_secs_f64());
        let mut crossed_any = false;
        for threshold_secs in &self.pool.config.leak_thresholds_secs {
            if held.as_secs() >= *threshold_secs {
                crossed_any = true;
                self.pool
                    .metrics
                    .pool_long_held_total
                    .with_label_values(&[&threshold_secs.to_string()])
                    .inc();
                warn!(
                    held_secs = held.as_secs(),
                    threshold_secs, "PLS session held past leak threshold"
                );
            }
        }
        if crossed_any {
            self.pool.metrics.pool_leak_total.inc();
        }
    }
}

impl TrackedPool {
    pub async fn connect(endpoint: &str, config: PoolConfig, metrics: Metrics) -> Result<Self> {
        let connect_options: PgConnectOptions = endpoint
            .parse()
            .map_err(|e| PipelineError::Fatal(format!("invalid PLS endpoint: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.size)
            .acquire_timeout(config.acquire_timeout)
            .max_lifetime(config.recycle_after)
            .test_before_acquire(config.health_check_on_acquire)
            .connect_with(connect_options)
            .await
            .map_err(|e| PipelineError::Fatal(format!("PLS pool init failed: {e}")))?;

        info!(
            max_connections = config.max_connections(),
            acquire_timeout_secs = config.acquire_timeout.as_secs(),
            "PLS connection pool initialized"
        );

        Ok(Self {
            pool,
            config,
            outstanding: DashMap::new(),
            acquire_failures: std::sync::Arc::new(AtomicU64::new(0)),
            metrics,
        })
    }

    pub fn raw(&self) -> &PgPool {
        &self.pool
    }

    /// Acquire a tracked lease. The returned guard's `Drop` records hold
    /// time against the leak thresholds; callers still issue queries
    /// through `self.raw()` (sqlx multiplexes physical connections itself).
    pub async fn acquire(&self) -> Result<PoolLease<'_>> {
        match tokio::time::timeout(self.config.acquire_timeout, self.pool.acquire()).await {
            Ok(Ok(conn)) => {
                // Don't hold sqlx's own connection guard — we only want the
                // physical connection back in rotation immediately;
                // leak tracking is a logical overlay independent of it.
                drop(conn);
                let id = Uuid::new_v4();
                self.outstanding.insert(id, Instant::now());
                Ok(PoolLease {
                    id,
                    started: Instant::now(),
                    pool: self,
                })
            }
            Ok(Err(e)) => {
                self.acquire_failures.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::BackendUnavailable(format!(
                    "PLS pool acquire failed: {e}"
                )))
            }
            Err(_) => {
                self.acquire_failures.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::BackendUnavailable(
                    "PLS pool acquire_timeout exceeded".into(),
                ))
            }
        }
    }

    /// Snapshot of in-use/idle sessions, for `/health` and `/metrics`.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
            max_size: self.config.max_connections(),
            outstanding_tracked: self.outstanding.len() as u32,
        }
    }

    /// Run the periodic leak-threshold sweep. Intended to be spawned once
    /// at startup; loops until cancelled.
    pub async fn run_leak_sweep(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let stats = self.stats();
            self.metrics.pool_size.set(stats.size as i64);
            self.metrics.pool_in_use.set((stats.size - stats.idle) as i64);
            self.metrics.pool_available.set(stats.idle as i64);

            let now = Instant::now();
            for threshold_secs in &self.config.leak_thresholds_secs {
                let threshold = Duration::from_secs(*threshold_secs);
                let count = self
                    .outstanding
                    .iter()
                    .filter(|entry| now.duration_since(*entry.value()) >= threshold)
                    .count();
                self.metrics
                    .pool_long_held_gauge
                    .with_label_values(&[&threshold_secs.to_string()])
                    .set(count as f64);
            }
        }
    }
}

/// Pool introspection snapshot exposed via `/health` and the metrics registry.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max_size: u32,
    pub outstanding_tracked: u32,
}
