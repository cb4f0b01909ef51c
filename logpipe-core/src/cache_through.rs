use std::sync::Arc;

use logpipe_model::{CacheKey, LogRecord, Result};
use tracing::debug;

use crate::ports::{DurableQueue, LogStore};

/// Where a `Query` result came from (spec §6 `GET /api/logs/{device_id}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Db,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Db => "db",
        }
    }
}

/// Read-through cache over the PLS, keyed by `(device_id, limit)` (spec
/// §4.1 `Query`, §3 `CacheEntry`). A cache outage degrades silently to a
/// direct PLS read — the DMQ's cache namespace is fail-open by contract.
pub struct CacheThrough {
    dmq: Arc<dyn DurableQueue>,
    pls: Arc<dyn LogStore>,
}

impl CacheThrough {
    pub fn new(dmq: Arc<dyn DurableQueue>, pls: Arc<dyn LogStore>) -> Self {
        Self { dmq, pls }
    }

    pub async fn query_recent(
        &self,
        device_id: &str,
        limit: u32,
    ) -> Result<(Source, Vec<LogRecord>)> {
        let key = CacheKey::RecentLogs {
            device_id: device_id.to_string(),
            limit,
        };

        if let Some(cached) = self.dmq.cache_get(&key.to_string()).await {
            if let Ok(records) = serde_json::from_str::<Vec<LogRecord>>(&cached) {
                debug!(device_id, limit, "query cache hit");
                return Ok((Source::Cache, records));
            }
        }

        debug!(device_id, limit, "query cache miss, falling through to PLS");
        let records = self.pls.query_recent(device_id, limit).await?;

        if let Ok(serialized) = serde_json::to_string(&records) {
            self.dmq
                .cache_set_ex(&key.to_string(), &serialized, key.ttl())
                .await;
        }

        Ok((Source::Db, records))
    }

    pub async fn stats(&self) -> Result<(Source, u64)> {
        let key = CacheKey::StatsSummary;

        if let Some(cached) = self.dmq.cache_get(&key.to_string()).await {
            if let Ok(count) = cached.parse::<u64>() {
                return Ok((Source::Cache, count));
            }
        }

        let count = self.pls.count().await?;
        self.dmq
            .cache_set_ex(&key.to_string(), &count.to_string(), key.ttl())
            .await;
        Ok((Source::Db, count))
    }

    /// Invalidate the stats cache entry; called after a successful ingest
    /// so stats converge faster than the bare TTL would allow on its own.
    /// Per-device `logs:*` entries are left to expire naturally (spec §8
    /// "Cache coherence": a query before TTL may legitimately show a stale
    /// result).
    pub async fn invalidate_stats(&self) {
        self.dmq.cache_del(&CacheKey::StatsSummary.to_string()).await;
    }
}
