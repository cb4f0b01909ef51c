use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use tracing::{debug, info};

use crate::{cli::Cli, models::Config};

/// Load configuration with precedence (lowest to highest):
/// compiled-in defaults → `logpipe.toml` → `LOGPIPE_*` env vars → CLI flags.
pub fn load(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("LOGPIPE_CONFIG").ok().map(Into::into));

    let defaults = Config::default();
    let mut builder = config::Config::builder()
        .set_default("ingest.http_host", defaults.ingest.http_host.clone())?
        .set_default("ingest.http_port", defaults.ingest.http_port as i64)?
        .set_default("ingest.dmq_endpoint", defaults.ingest.dmq_endpoint.clone())?
        .set_default("ingest.pls_endpoint", defaults.ingest.pls_endpoint.clone())?
        .set_default(
            "ingest.cache_ttl_query",
            defaults.ingest.cache_ttl_query.as_secs() as i64,
        )?
        .set_default(
            "ingest.cache_ttl_stats",
            defaults.ingest.cache_ttl_stats.as_secs() as i64,
        )?
        .set_default("ingest.dmq_max_conns", defaults.ingest.dmq_max_conns as i64)?
        .set_default(
            "ingest.query_limit_max",
            defaults.ingest.query_limit_max as i64,
        )?
        .set_default("dmq.stream_name", defaults.dmq.stream_name.clone())?
        .set_default("dmq.group_name", defaults.dmq.group_name.clone())?
        .set_default("worker.consumer_id", defaults.worker.consumer_id.clone())?
        .set_default("worker.batch_size", defaults.worker.batch_size as i64)?
        .set_default(
            "worker.read_block",
            defaults.worker.read_block.as_millis() as i64,
        )?
        .set_default(
            "worker.claim_idle_threshold",
            defaults.worker.claim_idle_threshold.as_secs() as i64,
        )?
        .set_default(
            "worker.claim_sweep_interval",
            defaults.worker.claim_sweep_interval.as_secs() as i64,
        )?
        .set_default("worker.retry_budget", defaults.worker.retry_budget as i64)?
        .set_default(
            "worker.retry_base_backoff",
            defaults.worker.retry_base_backoff.as_millis() as i64,
        )?
        .set_default("pool.size", defaults.pool.size as i64)?
        .set_default("pool.overflow", defaults.pool.overflow as i64)?
        .set_default(
            "pool.acquire_timeout",
            defaults.pool.acquire_timeout.as_secs() as i64,
        )?
        .set_default(
            "pool.recycle_after",
            defaults.pool.recycle_after.as_secs() as i64,
        )?
        .set_default(
            "pool.health_check_on_acquire",
            defaults.pool.health_check_on_acquire,
        )?
        .set_default(
            "pool.leak_thresholds_secs",
            defaults
                .pool
                .leak_thresholds_secs
                .iter()
                .map(|v| *v as i64)
                .collect::<Vec<_>>(),
        )?;

    if let Some(path) = &config_path {
        debug!(path = %path.display(), "loading logpipe.toml");
        builder = builder.add_source(
            File::new(&path.to_string_lossy(), FileFormat::Toml).required(false),
        );
    }

    builder = builder.add_source(
        Environment::with_prefix("LOGPIPE")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: Config = builder
        .build()
        .context("building layered configuration")?
        .try_deserialize()
        .context("deserializing configuration")?;

    cli.apply_overrides(&mut cfg);

    info!(
        http_port = cfg.ingest.http_port,
        consumer_id = %cfg.worker.consumer_id,
        "configuration loaded"
    );

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn loads_defaults_with_no_overrides() {
        let cli = Cli::parse_from(["logpipe"]);
        let cfg = load(&cli).expect("config loads");
        assert_eq!(cfg.ingest.http_port, 8080);
        assert_eq!(cfg.worker.batch_size, 100);
    }

    #[test]
    fn cli_flag_overrides_default_port() {
        let cli = Cli::parse_from(["logpipe", "--http-port", "9090"]);
        let cfg = load(&cli).expect("config loads");
        assert_eq!(cfg.ingest.http_port, 9090);
    }

    #[test]
    fn toml_file_overrides_default_and_cli_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logpipe.toml");
        std::fs::write(&path, "[worker]\nbatch_size = 250\n").unwrap();

        let cli = Cli::parse_from([
            "logpipe",
            "--config",
            path.to_str().unwrap(),
            "--http-port",
            "9191",
        ]);
        let cfg = load(&cli).expect("config loads");
        assert_eq!(cfg.worker.batch_size, 250);
        assert_eq!(cfg.ingest.http_port, 9191);
    }
}
