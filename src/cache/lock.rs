use std::sync::{Mutex, MutexGuard, PoisonError};

use metrics::counter;
use tracing::warn;

const METRIC_LOCK_POISONED_TOTAL: &str = "keylock_lock_poisoned_total";

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// Key locks guard `()` and region LRUs are only ever mutated by single
/// `get`/`push`/`pop` calls, so a poisoned guard never exposes a half-written
/// entry. Recovery is logged and counted.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op))
}

fn recover<G>(poisoned: PoisonError<G>, target: &'static str, op: &'static str) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind = "mutex.lock",
        result = "poisoned_recovered",
        hint = "a producer or store call panicked while holding this lock",
        "Recovered from poisoned cache lock"
    );
    counter!(METRIC_LOCK_POISONED_TOTAL, "target_module" => target).increment(1);
    poisoned.into_inner()
}
