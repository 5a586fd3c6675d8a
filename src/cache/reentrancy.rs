//! Reentrancy depth of the current thread of control.
//!
//! A producer running inside `get_or_add` sits one level deeper than its
//! caller. The depth is folded into the `LockHash`, so a producer that asks
//! the cache for its own key picks a different lock than the one its caller
//! already holds.
//!
//! Blocking callers are tracked per OS thread. Async callers are tracked per
//! tokio task, scoped with `tokio::task_local!` around the producer future.

use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

tokio::task_local! {
    static TASK_DEPTH: usize;
}

/// Depth of the calling thread; zero outside any producer.
pub fn depth() -> usize {
    DEPTH.get()
}

/// Enter a producer on the calling thread.
///
/// The previous depth is restored when the guard drops, including while
/// unwinding from a panicking producer.
pub fn enter() -> DepthGuard {
    let previous = DEPTH.get();
    DEPTH.set(previous + 1);
    DepthGuard {
        previous,
        _thread_bound: PhantomData,
    }
}

/// Restores the thread's depth on drop. Not `Send`: it must drop on the
/// thread that created it.
#[must_use = "dropping the guard restores the previous depth immediately"]
pub struct DepthGuard {
    previous: usize,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.set(self.previous);
    }
}

/// Depth of the current tokio task; zero outside any async producer.
pub fn task_depth() -> usize {
    TASK_DEPTH.try_with(|depth| *depth).unwrap_or(0)
}

/// Run `future` one level deeper than the current task.
pub async fn scope_entered<F: Future>(future: F) -> F::Output {
    TASK_DEPTH.scope(task_depth() + 1, future).await
}
