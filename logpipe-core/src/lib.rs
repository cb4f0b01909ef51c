//! The Durable Message Queue and Persistent Log Store adapters, the
//! connection-pool diagnostics, and the read-through cache coherence layer
//! (spec §4.2, §4.4, §3 `CacheEntry`).

pub mod cache_through;
pub mod dmq;
pub mod metrics;
pub mod pls;
pub mod pool;
pub mod ports;
pub mod shutdown;

pub use cache_through::{CacheThrough, Source};
pub use dmq::{ClaimedEntry, ReadEntry, RedisQueue};
pub use metrics::Metrics;
pub use pls::PostgresLogStore;
pub use pool::{PoolStats, TrackedPool};
pub use ports::{DurableQueue, InsertOutcome, LogStore};
pub use shutdown::Shutdown;
