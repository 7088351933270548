//! Logical-activation identity.
//!
//! An activation is one logical execution chain: the unit the reentrant
//! lock and the creation-cycle detector count against. It is tracked
//! thread-locally but is not the OS thread: a worker servicing queued work
//! enters a fresh activation per job, and a helper acting on behalf of
//! another chain may adopt that chain's id.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type ActivationId = u64;

static NEXT_ACTIVATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<ActivationId> = const { Cell::new(0) };
}

fn fresh_id() -> ActivationId {
    NEXT_ACTIVATION.fetch_add(1, Ordering::Relaxed)
}

/// The activation of the calling chain, assigned lazily on first use.
pub(crate) fn current() -> ActivationId {
    CURRENT.with(|cell| {
        let id = cell.get();
        if id != 0 {
            return id;
        }
        let id = fresh_id();
        cell.set(id);
        id
    })
}

/// Runs the closure under the given activation id, restoring the previous
/// one afterwards. Used by workers adopting a caller's chain.
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) fn enter<R>(id: ActivationId, f: impl FnOnce() -> R) -> R {
    CURRENT.with(|cell| {
        let previous = cell.replace(id);
        let _restore = Restore { previous };
        f()
    })
}

/// Runs the closure under a brand-new activation, restoring the previous
/// one afterwards. Each queued job on a worker thread is its own chain.
pub(crate) fn enter_fresh<R>(f: impl FnOnce() -> R) -> R {
    CURRENT.with(|cell| {
        let previous = cell.replace(fresh_id());
        let _restore = Restore { previous };
        f()
    })
}

struct Restore {
    previous: ActivationId,
}

impl Drop for Restore {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_within_a_thread() {
        assert_eq!(current(), current());
    }

    #[test]
    fn test_fresh_differs_and_restores() {
        let outer = current();
        let inner = enter_fresh(current);
        assert_ne!(outer, inner);
        assert_eq!(current(), outer);
    }

    #[test]
    fn test_adopted_id_is_visible_across_threads() {
        let id = current();
        let seen = std::thread::spawn(move || enter(id, current)).join().unwrap();
        assert_eq!(seen, id);
    }
}
