//! Cancellation tokens.
//!
//! Context scopes tie the lifetime of their instances to one of these: when
//! the token fires, every instance created under the context is destroyed.
//! Tokens are also usable on their own as a lightweight, hierarchical
//! cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A token that signals cancellation to anything holding a clone of it.
///
/// Cancellation is one-way and sticky: once cancelled, a token never
/// resets. Callbacks registered with [`on_cancel`](CancellationToken::on_cancel)
/// run exactly once, on the thread that calls [`cancel`](CancellationToken::cancel)
/// (or immediately, if the token already fired).
///
/// # Examples
///
/// ```rust
/// use berth::CancellationToken;
///
/// let token = CancellationToken::new();
/// let child = token.child_token();
///
/// assert!(!child.is_cancelled());
/// token.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    state: Mutex<TokenState>,
    fired: Condvar,
}

#[derive(Default)]
struct TokenState {
    cancelled: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl CancellationToken {
    /// Creates a new, uncancelled token.
    pub fn new() -> CancellationToken {
        CancellationToken {
            inner: Arc::new(TokenInner {
                state: Mutex::new(TokenState::default()),
                fired: Condvar::new(),
            }),
        }
    }

    /// Creates a child token that is cancelled when this token is
    /// cancelled. Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let weak = Arc::downgrade(&child.inner);
        self.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                CancellationToken { inner }.cancel();
            }
        });
        child
    }

    /// Cancels the token. Registered callbacks run once, in registration
    /// order, on the calling thread. Subsequent calls are no-ops.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.fired.notify_all();
        for callback in callbacks {
            callback();
        }
    }

    /// True once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Registers a callback to run on cancellation. If the token already
    /// fired, the callback runs immediately on this thread.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                true
            } else {
                state.callbacks.push(Box::new(callback));
                return;
            }
        };
        if run_now {
            callback();
        }
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.cancelled {
            self.inner.fired.wait(&mut state);
        }
    }

    /// Blocks until the token is cancelled or the timeout elapses.
    /// Returns true if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.cancelled {
            if self
                .inner
                .fired
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.cancelled;
            }
        }
        true
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        CancellationToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancellation_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_token_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        parent.cancel();
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_token_independent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_on_cancel_runs_exactly_once() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = calls.clone();
        token.on_cancel(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registration after the fact runs immediately.
        let counted = calls.clone();
        token.on_cancel(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            true
        });
        std::thread::sleep(Duration::from_millis(10));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_timeout() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
        token.cancel();
        assert!(token.wait_timeout(Duration::from_millis(10)));
    }
}
