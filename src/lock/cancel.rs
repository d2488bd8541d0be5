//! Cancellation token for blocked lock acquisitions.
//!
//! Replaces thread-interrupt style control flow with an explicit token:
//! cancelling surfaces as a [`CadenceError::Cancelled`] result from the
//! blocked call rather than as an out-of-band signal.
//!
//! [`CadenceError::Cancelled`]: crate::error::CadenceError::Cancelled

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something a cancel token wakes when it fires.
///
/// Implementors must take their own wait mutex before notifying, so a waiter
/// that has checked the flag but not yet parked cannot miss the wakeup.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Arc<dyn Wake>>>,
}

/// Cloneable cancellation handle for blocked acquisitions.
///
/// Cancellation is sticky: once fired, every current and future cancellable
/// acquisition observing this token aborts its wait. Clones share the same
/// underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token and wake every registered waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let waiters: Vec<Arc<dyn Wake>> = lock(&self.inner.waiters).clone();
        for waiter in waiters {
            waiter.wake();
        }
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a waiter for the duration of one blocking wait.
    pub(crate) fn register(&self, waiter: Arc<dyn Wake>) -> WaitRegistration {
        lock(&self.inner.waiters).push(Arc::clone(&waiter));
        WaitRegistration {
            token: Arc::clone(&self.inner),
            waiter,
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Removes the waiter entry when the wait ends, granted or not.
pub(crate) struct WaitRegistration {
    token: Arc<TokenInner>,
    waiter: Arc<dyn Wake>,
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        let mut waiters = lock(&self.token.waiters);
        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, &self.waiter)) {
            waiters.swap_remove(pos);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn new_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_sticky_and_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancel_wakes_registered_waiters() {
        let token = CancelToken::new();
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let registration = token.register(Arc::clone(&waker) as Arc<dyn Wake>);

        token.cancel();
        assert_eq!(waker.0.load(Ordering::SeqCst), 1);
        drop(registration);
    }

    #[test]
    fn dropped_registration_is_not_woken() {
        let token = CancelToken::new();
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let registration = token.register(Arc::clone(&waker) as Arc<dyn Wake>);
        drop(registration);

        token.cancel();
        assert_eq!(waker.0.load(Ordering::SeqCst), 0);
    }
}
