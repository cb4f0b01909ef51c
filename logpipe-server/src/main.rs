//! # logpipe-server
//!
//! The Ingest Front End (IFE) and, when co-located, the Worker Pool (WP) of
//! the device-telemetry log pipeline. A single deployable binary whose
//! `--role` flag picks which subsystem(s) this process runs.
//!
//! ## Architecture
//!
//! - Axum HTTP surface accepting log submissions and serving read-through
//!   cached queries.
//! - Redis Streams as the Durable Message Queue (DMQ), consumer-group
//!   delivery with at-least-once semantics.
//! - PostgreSQL as the Persistent Log Store (PLS), behind a leak-tracked
//!   connection pool.

pub mod app_state;
pub mod handlers;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use logpipe_config::{Cli, Role};
use logpipe_core::{CacheThrough, DurableQueue, LogStore, Metrics, PostgresLogStore, RedisQueue, Shutdown, TrackedPool};
use logpipe_worker::WorkerPool;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = logpipe_config::load(&cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logpipe_server=info,logpipe_core=info,logpipe_worker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(role = ?cli.role, "starting logpipe");

    let metrics = Metrics::new();

    let dmq: Arc<dyn DurableQueue> = Arc::new(
        RedisQueue::connect(
            &config.ingest.dmq_endpoint,
            config.dmq.stream_name.clone(),
            config.dmq.group_name.clone(),
            config.dmq.max_len,
            metrics.clone(),
        )
        .await?,
    );

    let pool = TrackedPool::connect(&config.ingest.pls_endpoint, config.pool.clone(), metrics.clone()).await?;
    let pls_store = PostgresLogStore::new(pool.clone(), metrics.clone());
    pls_store.migrate().await?;
    let pls: Arc<dyn LogStore> = Arc::new(pls_store);

    let cache = Arc::new(CacheThrough::new(dmq.clone(), pls.clone()));

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let mut task_handles = Vec::new();

    task_handles.push(tokio::spawn({
        let pool = pool.clone();
        let mut rx = shutdown.subscribe();
        async move {
            tokio::select! {
                _ = pool.run_leak_sweep(Duration::from_secs(30)) => {}
                _ = rx.recv() => { info!("leak sweep shutting down"); }
            }
        }
    }));

    let mut worker_pool = None;
    if matches!(cli.role, Role::Worker | Role::Both) {
        let mut wp = WorkerPool::build(
            cli.worker_count,
            dmq.clone(),
            pls.clone(),
            config.worker.clone(),
            metrics.clone(),
        )
        .await?;
        wp.spawn(&shutdown);
        info!(worker_count = cli.worker_count, "worker pool started");
        worker_pool = Some(wp);
    }

    if matches!(cli.role, Role::Ife | Role::Both) {
        let state = AppState {
            dmq: dmq.clone(),
            pls: pls.clone(),
            cache,
            pool,
            metrics,
            config: Arc::new(config.ingest.clone()),
        };

        let addr = format!("{}:{}", state.config.http_host, state.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr, "IFE listening");

        let app = routes::create_router(state);
        let mut rx = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                rx.recv().await.ok();
                info!("IFE draining in-flight requests");
            })
            .await?;
    } else {
        // Worker-only process: block on shutdown instead of serving HTTP.
        let mut rx = shutdown.subscribe();
        rx.recv().await.ok();
    }

    for handle in task_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "background task panicked during shutdown");
        }
    }

    if let Some(wp) = worker_pool {
        wp.join().await;
    }

    info!("logpipe shutdown complete");
    Ok(())
}

fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        shutdown.trigger();
    });
}
