use std::path::PathBuf;

use clap::Parser;

use crate::models::Config;

/// Command-line flags, highest-precedence layer over file/env configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "logpipe", about = "Device telemetry log-collection pipeline")]
pub struct Cli {
    /// Path to a `logpipe.toml` file (overrides `LOGPIPE_CONFIG`).
    #[arg(long, env = "LOGPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP bind port for the Ingest Front End.
    #[arg(long)]
    pub http_port: Option<u16>,

    /// HTTP bind host for the Ingest Front End.
    #[arg(long)]
    pub http_host: Option<String>,

    /// Redis URL backing the Durable Message Queue.
    #[arg(long)]
    pub dmq_endpoint: Option<String>,

    /// Postgres URL backing the Persistent Log Store.
    #[arg(long)]
    pub pls_endpoint: Option<String>,

    /// Stable consumer id for a worker process; reused after a crash is
    /// intentional (spec §5 "Worker consumer_id").
    #[arg(long)]
    pub consumer_id: Option<String>,

    /// Target batch size per `ReadGroup` call.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Which subsystem(s) this process runs: the IFE, the WP, or both
    /// in-process (spec §2.1 "single deployable binary with a `--role`
    /// switch"). Defaults to running both.
    #[arg(long, value_enum, default_value_t = Role::Both)]
    pub role: Role,

    /// Number of worker tasks to spawn when this process runs the WP role.
    #[arg(long, default_value_t = 4)]
    pub worker_count: usize,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ingest Front End only.
    Ife,
    /// Worker Pool only.
    Worker,
    /// Both, co-located in one process (the default).
    Both,
}

impl Cli {
    /// Apply any CLI flags the user actually passed on top of the
    /// file/env-derived configuration.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(v) = &self.http_host {
            cfg.ingest.http_host = v.clone();
        }
        if let Some(v) = self.http_port {
            cfg.ingest.http_port = v;
        }
        if let Some(v) = &self.dmq_endpoint {
            cfg.ingest.dmq_endpoint = v.clone();
        }
        if let Some(v) = &self.pls_endpoint {
            cfg.ingest.pls_endpoint = v.clone();
        }
        if let Some(v) = &self.consumer_id {
            cfg.worker.consumer_id = v.clone();
        }
        if let Some(v) = self.batch_size {
            cfg.worker.batch_size = v;
        }
    }
}
