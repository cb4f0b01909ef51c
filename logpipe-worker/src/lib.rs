//! The Worker Pool (spec §4.3): a shared-consumer-group of workers that
//! drain the DMQ into the PLS with at-least-once, idempotent delivery.

pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::Worker;
