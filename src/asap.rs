//! A per-thread "as soon as possible" queue.
//!
//! Observers of a [`Deferred`](crate::Deferred) never run inside the call that
//! registered them or settled the promise. Their work is pushed here instead
//! and runs, in submission order, the next time the queue is drained, either
//! by an explicit [`run_until_stalled`] or by polling a `Deferred` as a
//! `Future`.
//!
//! # Examples
//!
//! ```
//! use std::{cell::Cell, rc::Rc};
//! use thenable::asap;
//!
//! let ran = Rc::new(Cell::new(false));
//! let flag = ran.clone();
//! asap::schedule(move || flag.set(true));
//! assert!(!ran.get());
//! assert_eq!(asap::run_until_stalled(), 1);
//! assert!(ran.get());
//! ```
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    mem,
    task::Waker,
};

/// A unit of work accepted by [`schedule`].
pub type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
    static WAKERS: RefCell<Vec<Waker>> = const { RefCell::new(Vec::new()) };
}

/// Queues `task` to run after every task already queued on this thread.
pub fn schedule<F>(task: F)
where
    F: FnOnce() + 'static,
{
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
    let wakers = WAKERS.with(|wakers| mem::take(&mut *wakers.borrow_mut()));
    for waker in wakers {
        waker.wake();
    }
}

/// Wakes `waker` the next time a task is queued on this thread.
///
/// A future that drains the queue and still has to wait parks here, so work
/// queued later by some other future gets a poll to run it.
pub fn wake_on_schedule(waker: &Waker) {
    WAKERS.with(|wakers| {
        let mut wakers = wakers.borrow_mut();
        if !wakers.iter().any(|parked| parked.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    });
}

/// Runs queued tasks until the queue is empty and returns how many ran.
///
/// Tasks scheduled while draining run in the same call, after the ones
/// queued before them. A nested call from inside a running task does
/// nothing and returns 0; the outer drain picks up the remaining work.
pub fn run_until_stalled() -> usize {
    if FLUSHING.with(|flushing| flushing.replace(true)) {
        return 0;
    }
    let _guard = FlushGuard;
    let mut ran = 0;
    // The borrow must end before the task runs, tasks schedule more tasks.
    while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(ran, "asap queue drained");
    }
    ran
}

/// Number of tasks waiting on this thread.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|flushing| flushing.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::{waker, ArcWake};
    use std::{
        rc::Rc,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    #[test]
    fn test_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            schedule(move || log.borrow_mut().push(i));
        }
        assert_eq!(pending(), 3);
        assert!(log.borrow().is_empty());
        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn test_tasks_scheduled_while_draining_run_last() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        schedule(move || {
            outer.borrow_mut().push("a");
            let inner = outer.clone();
            schedule(move || inner.borrow_mut().push("c"));
        });
        let second = log.clone();
        schedule(move || second.borrow_mut().push("b"));
        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nested_drain_is_a_no_op() {
        let nested = Rc::new(Cell::new(usize::MAX));
        let slot = nested.clone();
        schedule(move || slot.set(run_until_stalled()));
        schedule(|| {});
        assert_eq!(run_until_stalled(), 2);
        assert_eq!(nested.get(), 0);
    }

    struct CountingWaker(AtomicUsize);

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_schedule_wakes_parked_wakers_once() {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = waker(counter.clone());
        wake_on_schedule(&waker);
        wake_on_schedule(&waker);
        schedule(|| {});
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        schedule(|| {});
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(run_until_stalled(), 2);
    }

    #[test]
    fn test_empty_queue() {
        assert_eq!(run_until_stalled(), 0);
    }
}
