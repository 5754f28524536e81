use std::io;
use thiserror::Error;

/// Failures of the pool itself, returned synchronously by the call that hit them.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("thread pool is stopped")]
    Stopped,
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Failures of a single task, surfaced only through its `ResultHandle`.
#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was dropped before it ran")]
    Abandoned,
    #[error("timed out waiting for task result")]
    Timeout,
}
