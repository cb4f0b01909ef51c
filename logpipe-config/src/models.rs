use std::time::Duration;

use serde::Deserialize;

/// Ingest Front End configuration (spec §6 "IFE").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub http_host: String,
    pub http_port: u16,
    pub dmq_endpoint: String,
    pub pls_endpoint: String,
    #[serde(with = "humantime_serde_secs")]
    pub cache_ttl_query: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub cache_ttl_stats: Duration,
    pub dmq_max_conns: u32,
    pub query_limit_max: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".into(),
            http_port: 8080,
            dmq_endpoint: "redis://127.0.0.1:6379".into(),
            pls_endpoint: "postgres://localhost/logpipe".into(),
            cache_ttl_query: Duration::from_secs(300),
            cache_ttl_stats: Duration::from_secs(60),
            dmq_max_conns: 200,
            query_limit_max: 1000,
        }
    }
}

/// Durable Message Queue stream/group naming (spec §6 "DMQ").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DmqConfig {
    pub stream_name: String,
    pub group_name: String,
    pub max_len: Option<u64>,
}

impl Default for DmqConfig {
    fn default() -> Self {
        Self {
            stream_name: "logs:stream".into(),
            group_name: "log_workers".into(),
            max_len: None,
        }
    }
}

/// Worker Pool configuration (spec §6 "WP").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub consumer_id: String,
    pub batch_size: usize,
    #[serde(with = "humantime_serde_millis")]
    pub read_block: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub claim_idle_threshold: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub claim_sweep_interval: Duration,
    pub retry_budget: u32,
    #[serde(with = "humantime_serde_millis")]
    pub retry_base_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_id: format!("worker-{}", uuid_like_suffix()),
            batch_size: 100,
            read_block: Duration::from_secs(2),
            claim_idle_threshold: Duration::from_secs(60),
            claim_sweep_interval: Duration::from_secs(30),
            retry_budget: 3,
            retry_base_backoff: Duration::from_millis(100),
        }
    }
}

/// PLS connection pool configuration (spec §6 "PLS pool").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: u32,
    pub overflow: u32,
    #[serde(with = "humantime_serde_secs")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub recycle_after: Duration,
    pub health_check_on_acquire: bool,
    pub leak_thresholds_secs: Vec<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            overflow: 5,
            acquire_timeout: Duration::from_secs(30),
            recycle_after: Duration::from_secs(3600),
            health_check_on_acquire: true,
            leak_thresholds_secs: vec![60, 300, 900],
        }
    }
}

impl PoolConfig {
    /// `sqlx::PgPoolOptions::max_connections` — steady-state plus overflow.
    pub fn max_connections(&self) -> u32 {
        self.size + self.overflow
    }
}

/// Top-level config aggregating every component, as loaded from
/// `logpipe.toml` / environment / CLI.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub dmq: DmqConfig,
    pub worker: WorkerConfig,
    pub pool: PoolConfig,
}

fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos & 0xffff_ffff)
}

mod humantime_serde_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Secs(u64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Secs(s) => Ok(Duration::from_secs(s)),
            Repr::Text(s) => humantime::parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}

mod humantime_serde_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(u64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Millis(ms) => Ok(Duration::from_millis(ms)),
            Repr::Text(s) => humantime::parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_max_connections_is_size_plus_overflow() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_connections(), 15);
    }

    #[test]
    fn defaults_match_spec() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.cache_ttl_query, Duration::from_secs(300));
        assert_eq!(ingest.cache_ttl_stats, Duration::from_secs(60));
        assert_eq!(ingest.dmq_max_conns, 200);

        let dmq = DmqConfig::default();
        assert_eq!(dmq.stream_name, "logs:stream");
        assert_eq!(dmq.group_name, "log_workers");

        let worker = WorkerConfig::default();
        assert_eq!(worker.batch_size, 100);
        assert_eq!(worker.read_block, Duration::from_secs(2));
        assert_eq!(worker.claim_idle_threshold, Duration::from_secs(60));
        assert_eq!(worker.claim_sweep_interval, Duration::from_secs(30));
        assert_eq!(worker.retry_budget, 3);

        let pool = PoolConfig::default();
        assert_eq!(pool.size, 10);
        assert_eq!(pool.overflow, 5);
        assert_eq!(pool.leak_thresholds_secs, vec![60, 300, 900]);
    }
}
