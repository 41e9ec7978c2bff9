use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock_recovering<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind = "mutex.lock",
            result = "poisoned_recovered",
            hint = "state may be stale after panic in another thread",
            "Recovered from poisoned lock"
        );
        poisoned.into_inner()
    })
}
