//! One-shot result channel between the worker running a task and whoever
//! holds the task's [`ResultHandle`].

use super::{errors::TaskError, result::TaskResult};
use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

enum Slot<T> {
    Pending,
    Ready(TaskResult<T>),
    Taken,
}

struct Cell<T> {
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
    waker: AtomicWaker,
}

impl<T> Cell<T> {
    fn try_take(&self) -> Option<TaskResult<T>> {
        let mut slot = self.slot.lock();
        take_ready(&mut slot)
    }
}

fn take_ready<T>(slot: &mut Slot<T>) -> Option<TaskResult<T>> {
    match mem::replace(slot, Slot::Taken) {
        Slot::Ready(result) => Some(result),
        // Already consumed by an earlier poll.
        Slot::Taken => Some(Err(TaskError::Abandoned)),
        Slot::Pending => {
            *slot = Slot::Pending;
            None
        }
    }
}

/// Creates a connected producer/consumer pair for a single task outcome.
pub(crate) fn channel<T>() -> (Resolver<T>, ResultHandle<T>) {
    let cell = Arc::new(Cell {
        slot: Mutex::new(Slot::Pending),
        resolved: Condvar::new(),
        waker: AtomicWaker::new(),
    });
    (
        Resolver { cell: Some(cell.clone()) },
        ResultHandle { cell },
    )
}

/// Producer end. Resolves the channel exactly once; dropping it unresolved
/// resolves the handle to [`TaskError::Abandoned`].
pub(crate) struct Resolver<T> {
    cell: Option<Arc<Cell<T>>>,
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(mut self, result: TaskResult<T>) {
        self.complete(result);
    }

    fn complete(&mut self, result: TaskResult<T>) {
        let Some(cell) = self.cell.take() else {
            return;
        };
        *cell.slot.lock() = Slot::Ready(result);
        cell.resolved.notify_all();
        cell.waker.wake();
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        self.complete(Err(TaskError::Abandoned));
    }
}

/// Consumer end of a submitted task.
///
/// Blocking callers use [`wait`](Self::wait) or
/// [`wait_timeout`](Self::wait_timeout); async callers `.await` the handle
/// directly. Do not block on `wait` from inside an async executor thread.
pub struct ResultHandle<T> {
    cell: Arc<Cell<T>>,
}

impl<T> ResultHandle<T> {
    /// Blocks until the task has run and returns its value, or the failure
    /// it produced.
    pub fn wait(self) -> TaskResult<T> {
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(result) = take_ready(&mut slot) {
                return result;
            }
            self.cell.resolved.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` with
    /// [`TaskError::Timeout`]. The handle is consumed either way, so a result
    /// that arrives after the timeout is lost.
    pub fn wait_timeout(self, timeout: Duration) -> TaskResult<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(result) = take_ready(&mut slot) {
                return result;
            }
            if self.cell.resolved.wait_until(&mut slot, deadline).timed_out() {
                return take_ready(&mut slot).unwrap_or(Err(TaskError::Timeout));
            }
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        !matches!(*self.cell.slot.lock(), Slot::Pending)
    }
}

impl<T> Future for ResultHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let cell = &self.get_mut().cell;
        if let Some(result) = cell.try_take() {
            return Poll::Ready(result);
        }
        cell.waker.register(cx.waker());
        match cell.try_take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resolves_across_threads() {
        let (tx, rx) = channel::<u32>();
        let producer = thread::spawn(move || tx.resolve(Ok(7)));
        assert_eq!(rx.wait(), Ok(7));
        producer.join().unwrap();
    }

    #[test]
    fn dropped_resolver_abandons_handle() {
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert!(rx.is_finished());
        assert_eq!(rx.wait(), Err(TaskError::Abandoned));
    }

    #[test]
    fn failure_is_delivered_as_is() {
        let (tx, rx) = channel::<u32>();
        tx.resolve(Err(TaskError::Panicked("boom".into())));
        assert_eq!(rx.wait(), Err(TaskError::Panicked("boom".into())));
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (_tx, rx) = channel::<u32>();
        assert!(!rx.is_finished());
        assert_eq!(
            rx.wait_timeout(Duration::from_millis(20)),
            Err(TaskError::Timeout)
        );
    }

    #[test]
    fn wait_timeout_returns_ready_value() {
        let (tx, rx) = channel::<&str>();
        tx.resolve(Ok("done"));
        assert_eq!(rx.wait_timeout(Duration::from_millis(20)), Ok("done"));
    }

    #[test]
    fn wait_timeout_accepts_unbounded_duration() {
        let (tx, rx) = channel::<u32>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.resolve(Ok(5));
        });
        assert_eq!(rx.wait_timeout(Duration::MAX), Ok(5));
        producer.join().unwrap();
    }

    #[test]
    fn handle_is_awaitable() {
        let (tx, rx) = channel::<u32>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.resolve(Ok(3));
        });
        assert_eq!(futures::executor::block_on(rx), Ok(3));
        producer.join().unwrap();
    }
}
