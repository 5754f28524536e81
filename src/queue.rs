//! The single FIFO queue every worker pulls from.

use super::{errors::PoolError, model::ShutdownPolicy, result::PoolResult};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// A type-erased unit of work, already bound to its result channel.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    // Only ever flipped while `tasks` is locked, so a waiter checking it under
    // the same lock cannot miss the transition.
    stopped: CachePadded<AtomicBool>,
    waiting: AtomicUsize,
    policy: ShutdownPolicy,
}

impl TaskQueue {
    pub(crate) fn new(policy: ShutdownPolicy) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopped: CachePadded::new(AtomicBool::new(false)),
            waiting: AtomicUsize::new(0),
            policy,
        }
    }

    /// Appends `task` and wakes one idle worker. Fails without enqueuing once
    /// the queue has been closed.
    pub(crate) fn push(&self, task: Task) -> PoolResult<()> {
        {
            let mut tasks = self.tasks.lock();
            if self.stopped.load(Ordering::Acquire) {
                return Err(PoolError::Stopped);
            }
            tasks.push_back(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a task is available or the queue is closed.
    ///
    /// Returns `None` when the calling worker should exit: under
    /// [`ShutdownPolicy::Drain`] only once the queue is closed *and* empty,
    /// under [`ShutdownPolicy::Discard`] as soon as it is closed.
    pub(crate) fn pop_blocking(&self) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        loop {
            let stopped = self.stopped.load(Ordering::Acquire);
            if stopped && self.policy == ShutdownPolicy::Discard {
                return None;
            }
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            if stopped {
                return None;
            }
            self.waiting.fetch_add(1, Ordering::Relaxed);
            self.available.wait(&mut tasks);
            self.waiting.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Sets the stop indicator and wakes every waiting worker. Returns `false`
    /// if the queue was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_stopped = {
            let _tasks = self.tasks.lock();
            self.stopped.swap(true, Ordering::AcqRel)
        };
        self.available.notify_all();
        !was_stopped
    }

    /// Removes every task still queued.
    pub(crate) fn drain(&self) -> Vec<Task> {
        self.tasks.lock().drain(..).collect()
    }

    #[inline]
    pub(crate) fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    #[inline]
    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn recording(tx: &mpsc::Sender<usize>, i: usize) -> Task {
        let tx = tx.clone();
        Box::new(move || tx.send(i).unwrap())
    }

    #[test]
    fn pops_in_push_order() {
        let queue = TaskQueue::new(ShutdownPolicy::Drain);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            queue.push(recording(&tx, i)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        for _ in 0..5 {
            (queue.pop_blocking().unwrap())();
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn push_after_close_is_rejected() {
        let queue = TaskQueue::new(ShutdownPolicy::Drain);
        assert!(queue.close());
        assert!(!queue.close());
        let result = queue.push(Box::new(|| {}));
        assert!(matches!(result, Err(PoolError::Stopped)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn draining_close_still_hands_out_queued_tasks() {
        let queue = TaskQueue::new(ShutdownPolicy::Drain);
        queue.push(Box::new(|| {})).unwrap();
        queue.close();
        assert!(queue.pop_blocking().is_some());
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn discarding_close_stops_handing_out_tasks() {
        let queue = TaskQueue::new(ShutdownPolicy::Discard);
        queue.push(Box::new(|| {})).unwrap();
        queue.close();
        assert!(queue.pop_blocking().is_none());
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn close_wakes_blocked_worker() {
        let queue = Arc::new(TaskQueue::new(ShutdownPolicy::Drain));
        let worker = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_blocking().is_none())
        };
        while queue.waiting() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();
        assert!(worker.join().unwrap());
    }
}
