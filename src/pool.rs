use super::{
    errors::{PoolError, TaskError},
    handle::{self, ResultHandle},
    model::{PoolMetrics, ShutdownPolicy},
    queue::{Task, TaskQueue},
    result::PoolResult,
};
use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
};

/// Worker count used when the host doesn't report its parallelism.
pub const FALLBACK_NUM_THREADS: usize = 2;

pub fn default_num_threads() -> usize {
    match num_cpus::get() {
        0 => FALLBACK_NUM_THREADS,
        n => n,
    }
}

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: usize,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub shutdown: ShutdownPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            thread_name_prefix: "worker".to_owned(),
            stack_size: None,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            num_threads: num_cpus::get_physical().max(1),
            ..Default::default()
        }
    }

    /// One worker: tasks also *start* in submission order.
    pub fn single() -> Self {
        Self {
            num_threads: 1,
            ..Default::default()
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }
}

struct Shared {
    queue: TaskQueue,
    active: AtomicUsize,
    total_submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    // Submitted tasks that have neither run nor been discarded.
    pending: Mutex<usize>,
    no_pending: Condvar,
}

impl Shared {
    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn finish(&self, n: usize) {
        let mut pending = self.pending.lock();
        *pending -= n;
        if *pending == 0 {
            self.no_pending.notify_all();
        }
    }

    fn record(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A fixed set of worker threads pulling closures from one FIFO queue.
///
/// The pool is running as soon as it is constructed and is single-use: once
/// [`stop`](Self::stop) (or `Drop`) has run, every further
/// [`submit`](Self::submit) fails with [`PoolError::Stopped`]. What happens to
/// tasks still queued at that point is governed by [`ShutdownPolicy`].
///
/// ```
/// use worker_pool::ThreadPool;
///
/// let pool = ThreadPool::new(Some(4)).unwrap();
/// let handles: Vec<_> = (0..10)
///     .map(|i| pool.submit(move || i * i).unwrap())
///     .collect();
/// let squares: Vec<i32> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
/// assert_eq!(squares[9], 81);
/// pool.shutdown();
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Mutex<Vec<ThreadId>>,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    num_threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    // One caller is joining the workers.
    Stopping,
    Stopped,
}

impl ThreadPool {
    /// Starts a pool with `num_threads` workers, or [`default_num_threads`]
    /// when `None`.
    pub fn new(num_threads: Option<usize>) -> PoolResult<Self> {
        let config = match num_threads {
            Some(num_threads) => Config::default().with_num_threads(num_threads),
            None => Config::default(),
        };
        Self::with_config(config)
    }

    /// Starts a pool sized by [`default_num_threads`].
    pub fn default_sized() -> PoolResult<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> PoolResult<Self> {
        if config.num_threads == 0 {
            return Err(PoolError::InvalidConfig("num_threads must be at least 1"));
        }

        let pool = Self {
            shared: Arc::new(Shared {
                queue: TaskQueue::new(config.shutdown),
                active: AtomicUsize::new(0),
                total_submitted: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                pending: Mutex::new(0),
                no_pending: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(config.num_threads)),
            worker_ids: Mutex::new(Vec::with_capacity(config.num_threads)),
            lifecycle: Mutex::new(Lifecycle::Running),
            stopped: Condvar::new(),
            num_threads: config.num_threads,
        };

        if let Err(err) = pool.start(&config) {
            error!("failed to start thread pool: {err}");
            pool.stop();
            return Err(err);
        }
        debug!(
            "started thread pool with {} workers ({:?} on shutdown)",
            config.num_threads, config.shutdown
        );
        Ok(pool)
    }

    fn start(&self, config: &Config) -> PoolResult<()> {
        let mut workers = self.workers.lock();
        let mut worker_ids = self.worker_ids.lock();
        for index in 0..config.num_threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, index));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let shared = Arc::clone(&self.shared);
            let handle = builder
                .spawn(move || worker_loop(index, &shared))
                .map_err(PoolError::WorkerSpawn)?;
            worker_ids.push(handle.thread().id());
            workers.push(handle);
        }
        Ok(())
    }

    /// Queues `f` and returns immediately with the handle its outcome will be
    /// delivered through. A panic inside `f` is caught on the worker and
    /// surfaces as [`TaskError::Panicked`] from the handle.
    pub fn submit<T, F>(&self, f: F) -> PoolResult<ResultHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.shared.queue.is_closed() {
            return Err(PoolError::Stopped);
        }

        let (resolver, handle) = handle::channel();
        let shared = Arc::clone(&self.shared);
        let task: Task = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!("task panicked: {message}");
                TaskError::Panicked(message)
            });
            shared.record(result.is_ok());
            resolver.resolve(result);
        });

        self.shared.begin();
        if let Err(err) = self.shared.queue.push(task) {
            self.shared.finish(1);
            return Err(err);
        }
        self.shared.total_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Binds `args` to `f` and submits the call.
    pub fn submit_with<A, T, F>(&self, f: F, args: A) -> PoolResult<ResultHandle<T>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(A) -> T + Send + 'static,
    {
        self.submit(move || f(args))
    }

    /// Blocks until every submitted task has either run or been discarded.
    pub fn wait_idle(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.no_pending.wait(&mut pending);
        }
    }

    /// Stops accepting tasks, wakes every worker and joins them all.
    ///
    /// Calling it again is a no-op. A concurrent caller waits until the first
    /// one has joined the workers, unless it runs on one of those workers, in
    /// which case it returns immediately.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            let state = *lifecycle;
            match state {
                Lifecycle::Running => *lifecycle = Lifecycle::Stopping,
                Lifecycle::Stopped => return,
                Lifecycle::Stopping => {
                    if !self.on_worker_thread() {
                        while *lifecycle != Lifecycle::Stopped {
                            self.stopped.wait(&mut lifecycle);
                        }
                    }
                    return;
                }
            }
        }

        self.shared.queue.close();
        let handles = mem::take(&mut *self.workers.lock());
        debug!("stopping thread pool with {} workers", handles.len());

        let current = thread::current().id();
        let mut on_own_worker = false;
        for handle in handles {
            if handle.thread().id() == current {
                warn!("thread pool stopped from its own worker; not joining it");
                on_own_worker = true;
                continue;
            }
            if let Err(err) = handle.join() {
                error!("worker thread failed to join: {err:?}");
            }
        }

        // A draining worker that called stop keeps emptying the queue once
        // its current task returns.
        if on_own_worker && self.shared.queue.policy() == ShutdownPolicy::Drain {
            self.mark_stopped();
            return;
        }

        let discarded = self.shared.queue.drain();
        if !discarded.is_empty() {
            let n = discarded.len();
            debug!("discarding {n} queued tasks");
            drop(discarded);
            self.shared.finish(n);
        }

        self.mark_stopped();
    }

    fn mark_stopped(&self) {
        *self.lifecycle.lock() = Lifecycle::Stopped;
        self.stopped.notify_all();
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_ids.lock().contains(&thread::current().id())
    }

    /// Consuming form of [`stop`](Self::stop).
    pub fn shutdown(self) {
        self.stop();
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Number of tasks waiting in the queue.
    #[inline]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            num_threads: self.num_threads,
            active_tasks: self.shared.active.load(Ordering::Relaxed),
            idle_workers: self.shared.queue.waiting(),
            queued_tasks: self.shared.queue.len(),
            total_submitted: self.shared.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.shared.completed.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(index: usize, shared: &Shared) {
    trace!("worker {index} started");
    while let Some(task) = shared.queue.pop_blocking() {
        shared.active.fetch_add(1, Ordering::Relaxed);
        task();
        shared.active.fetch_sub(1, Ordering::Relaxed);
        shared.finish(1);
    }
    trace!("worker {index} exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_thread_count_is_positive() {
        assert!(default_num_threads() >= 1);
        assert_eq!(Config::default().num_threads, default_num_threads());
    }

    #[test]
    fn default_sized_pool_uses_host_parallelism() {
        let pool = ThreadPool::default_sized().unwrap();
        assert_eq!(pool.num_threads(), default_num_threads());
        assert_eq!(pool.metrics().num_threads, default_num_threads());
        assert_eq!(pool.submit(|| 1 + 1).unwrap().wait(), Ok(2));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let result = ThreadPool::new(Some(0));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn workers_are_named_after_prefix() {
        let config = Config::single().with_thread_name_prefix("crunch");
        let pool = ThreadPool::with_config(config).unwrap();
        let name = pool
            .submit(|| thread::current().name().map(str::to_owned))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(name.as_deref(), Some("crunch-0"));
    }

    #[test]
    fn panic_message_is_extracted() {
        let payload = panic::catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad 1");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn wait_idle_returns_once_queue_is_empty() {
        let pool = ThreadPool::new(Some(2)).unwrap();
        for _ in 0..8 {
            pool.submit(|| thread::sleep(Duration::from_millis(5))).unwrap();
        }
        pool.wait_idle();
        let metrics = pool.metrics();
        assert_eq!(metrics.queued_tasks, 0);
        assert_eq!(metrics.active_tasks, 0);
        assert_eq!(metrics.completed_tasks, 8);
    }
}
