/// Point-in-time snapshot of a pool's counters.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub num_threads: usize,
    pub active_tasks: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    /// Share of the worker set currently executing a task.
    pub fn utilization(&self) -> f64 {
        if self.num_threads == 0 {
            return 0.0;
        }
        self.active_tasks.min(self.num_threads) as f64 / self.num_threads as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}


/// What happens to tasks still queued when the pool is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Workers keep running queued tasks and exit once the queue is empty.
    #[default]
    Drain,
    /// Workers exit as soon as they observe the stop; leftover tasks are
    /// dropped and their handles resolve to `TaskError::Abandoned`.
    Discard,
}
