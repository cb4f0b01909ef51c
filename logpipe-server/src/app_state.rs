use std::sync::Arc;

use logpipe_config::IngestConfig;
use logpipe_core::{CacheThrough, DurableQueue, LogStore, Metrics, TrackedPool};

/// Shared state handed to every axum handler (spec §4.1 IFE).
#[derive(Clone)]
pub struct AppState {
    pub dmq: Arc<dyn DurableQueue>,
    pub pls: Arc<dyn LogStore>,
    pub cache: Arc<CacheThrough>,
    pub pool: TrackedPool,
    pub metrics: Metrics,
    pub config: Arc<IngestConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
