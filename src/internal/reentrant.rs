//! An activation-reentrant lock.
//!
//! Ownership is accounted per logical activation, not per OS thread: the
//! chain that holds the lock may take it again (a commit-triggered callback
//! performing another commit), and a helper thread that adopted the owner's
//! activation re-enters rather than deadlocking. Other activations park
//! until the owner fully releases.

use parking_lot::{Condvar, Mutex};

use super::activation::{self, ActivationId};

#[derive(Default)]
struct OwnerState {
    owner: Option<ActivationId>,
    count: usize,
}

pub(crate) struct ReentrantLock {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl ReentrantLock {
    pub(crate) fn new() -> ReentrantLock {
        ReentrantLock {
            state: Mutex::new(OwnerState::default()),
            released: Condvar::new(),
        }
    }

    /// Acquires the lock for the current activation, re-entering if the
    /// activation already holds it.
    pub(crate) fn lock(&self) -> ReentrantGuard<'_> {
        let me = activation::current();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.count = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.count += 1;
                    break;
                }
                Some(_) => self.released.wait(&mut state),
            }
        }
        ReentrantGuard { lock: self }
    }
}

pub(crate) struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.lock.released.notify_all();
        }
    }
}
