//! Worker pools executing migration tasks.

pub mod base;
pub mod pool;

pub use base::{PoolTask, WorkerPool};
pub use pool::TaskPool;
