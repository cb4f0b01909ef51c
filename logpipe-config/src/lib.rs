//! Layered configuration for every logpipe component: compiled-in defaults,
//! an optional `logpipe.toml`, `LOGPIPE_*` environment variables, then CLI
//! flags, in that order of increasing precedence.

pub mod cli;
pub mod loader;
pub mod models;

pub use cli::{Cli, Role};
pub use loader::load;
pub use models::{DmqConfig, IngestConfig, PoolConfig, WorkerConfig};
