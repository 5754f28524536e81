//! A fixed-size pool of worker threads fed from a single FIFO queue.
//!
//! # Features
//! - Any `FnOnce() -> T + Send` closure can be submitted; each submission
//!   returns a [`ResultHandle`] that can be waited on or `.await`ed
//! - Panics are caught per task and surface only through that task's handle
//! - Single-use lifecycle: the pool starts on construction and stops once,
//!   explicitly or on drop, joining every worker
//! - Configurable shutdown: drain the queue or discard what is left

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
mod queue;
pub mod result;

pub use errors::{PoolError, TaskError};
pub use handle::ResultHandle;
pub use model::{PoolMetrics, ShutdownPolicy};
pub use pool::{default_num_threads, Config, ThreadPool};
pub use result::{PoolResult, TaskResult};
