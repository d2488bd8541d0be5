//! Shared/exclusive lock with a FIFO ticket queue.
//!
//! [`SharedExclusiveLock`] guards a single protected region with two
//! acquisition modes: shared (any number of concurrent holders) and
//! exclusive (one holder, excluding everything else). Requests are granted
//! in strict arrival order, so neither mode starves the other; a shared
//! request that arrives behind a queued exclusive request waits for it.
//!
//! Plain acquisitions block indefinitely. Callers that need a bound use the
//! `*_timeout` variants; callers that need to abort a wait thread a
//! [`CancelToken`] through the `*_cancellable` variants.
//!
//! The raw `acquire_*`/`release_*` operations are exposed for callers that
//! manage scopes manually; releasing a mode not currently held is reported
//! as an illegal-state error and leaves the counters untouched. Everyone
//! else should prefer the guard-returning methods.

mod cancel;
mod guard;
mod state;

pub use cancel::CancelToken;
pub use guard::{ExclusiveGuard, SharedGuard};
pub use state::LockMode;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use cancel::Wake;
use state::LockCore;

/// Cloneable handle to one shared/exclusive lock.
///
/// Clones refer to the same protected region. Construct one explicitly and
/// hand clones to the threads contending for the resource; there is no
/// process-wide instance.
#[derive(Clone)]
pub struct SharedExclusiveLock {
    core: Arc<LockCore>,
}

impl Default for SharedExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedExclusiveLock {
    /// Create an uncontended lock.
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore::new()),
        }
    }

    // --- raw operations ----------------------------------------------------

    /// Block until shared access is granted. Pair with [`release_shared`].
    ///
    /// [`release_shared`]: Self::release_shared
    pub fn acquire_shared(&self) {
        // No deadline and no token: the wait can only end in a grant.
        let granted = self.core.acquire(LockMode::Shared, None, None);
        debug_assert!(granted.is_ok());
    }

    /// Release one shared hold.
    ///
    /// # Errors
    ///
    /// [`CadenceError::ReleaseNotHeld`] when the shared count is already
    /// zero.
    ///
    /// [`CadenceError::ReleaseNotHeld`]: crate::error::CadenceError::ReleaseNotHeld
    pub fn release_shared(&self) -> Result<()> {
        self.core.release_shared()
    }

    /// Block until exclusive access is granted to the calling thread. Pair
    /// with [`release_exclusive`].
    ///
    /// [`release_exclusive`]: Self::release_exclusive
    pub fn acquire_exclusive(&self) {
        let granted = self.core.acquire(LockMode::Exclusive, None, None);
        debug_assert!(granted.is_ok());
    }

    /// Release exclusive access.
    ///
    /// # Errors
    ///
    /// [`CadenceError::ReleaseNotHeld`] when the calling thread is not the
    /// current exclusive holder.
    ///
    /// [`CadenceError::ReleaseNotHeld`]: crate::error::CadenceError::ReleaseNotHeld
    pub fn release_exclusive(&self) -> Result<()> {
        self.core.release_exclusive()
    }

    // --- guarded acquisition -----------------------------------------------

    /// Block until shared access is granted, returning a releasing guard.
    pub fn shared(&self) -> SharedGuard<'_> {
        self.acquire_shared();
        SharedGuard { lock: self }
    }

    /// Block until exclusive access is granted, returning a releasing guard.
    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        self.acquire_exclusive();
        ExclusiveGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Shared access without blocking. `None` when an exclusive holder is
    /// present or any request is queued ahead.
    pub fn try_shared(&self) -> Option<SharedGuard<'_>> {
        self.core
            .try_acquire(LockMode::Shared)
            .then(|| SharedGuard { lock: self })
    }

    /// Exclusive access without blocking. `None` when any holder is present
    /// or any request is queued ahead.
    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        self.core
            .try_acquire(LockMode::Exclusive)
            .then(|| ExclusiveGuard {
                lock: self,
                _not_send: PhantomData,
            })
    }

    /// Shared access with a bounded wait.
    ///
    /// # Errors
    ///
    /// [`CadenceError::AcquireTimeout`] when the wait expires.
    ///
    /// [`CadenceError::AcquireTimeout`]: crate::error::CadenceError::AcquireTimeout
    pub fn shared_timeout(&self, timeout: Duration) -> Result<SharedGuard<'_>> {
        self.core
            .acquire(LockMode::Shared, Some(Instant::now() + timeout), None)?;
        Ok(SharedGuard { lock: self })
    }

    /// Exclusive access with a bounded wait.
    ///
    /// # Errors
    ///
    /// [`CadenceError::AcquireTimeout`] when the wait expires.
    ///
    /// [`CadenceError::AcquireTimeout`]: crate::error::CadenceError::AcquireTimeout
    pub fn exclusive_timeout(&self, timeout: Duration) -> Result<ExclusiveGuard<'_>> {
        self.core
            .acquire(LockMode::Exclusive, Some(Instant::now() + timeout), None)?;
        Ok(ExclusiveGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Shared access that aborts when `token` fires.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Cancelled`] when the token fires before the grant.
    ///
    /// [`CadenceError::Cancelled`]: crate::error::CadenceError::Cancelled
    pub fn shared_cancellable(&self, token: &CancelToken) -> Result<SharedGuard<'_>> {
        let _registration = token.register(Arc::clone(&self.core) as Arc<dyn Wake>);
        self.core.acquire(LockMode::Shared, None, Some(token))?;
        Ok(SharedGuard { lock: self })
    }

    /// Exclusive access that aborts when `token` fires.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Cancelled`] when the token fires before the grant.
    ///
    /// [`CadenceError::Cancelled`]: crate::error::CadenceError::Cancelled
    pub fn exclusive_cancellable(&self, token: &CancelToken) -> Result<ExclusiveGuard<'_>> {
        let _registration = token.register(Arc::clone(&self.core) as Arc<dyn Wake>);
        self.core.acquire(LockMode::Exclusive, None, Some(token))?;
        Ok(ExclusiveGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    // --- introspection -----------------------------------------------------

    /// Current number of shared holders.
    pub fn shared_holders(&self) -> usize {
        self.core.shared_holders()
    }

    /// `true` while an exclusive holder is present.
    pub fn has_exclusive_holder(&self) -> bool {
        self.core.has_exclusive_holder()
    }

    /// Requests that have joined the queue but not yet been granted.
    pub fn queued_requests(&self) -> usize {
        self.core.queued_requests()
    }
}

impl std::fmt::Debug for SharedExclusiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedExclusiveLock")
            .field("shared_holders", &self.shared_holders())
            .field("has_exclusive_holder", &self.has_exclusive_holder())
            .field("queued_requests", &self.queued_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::CadenceError;
    use std::thread;

    #[test]
    fn raw_acquire_release_round_trip() {
        let lock = SharedExclusiveLock::new();

        lock.acquire_shared();
        assert_eq!(lock.shared_holders(), 1);
        lock.release_shared().unwrap();

        lock.acquire_exclusive();
        assert!(lock.has_exclusive_holder());
        lock.release_exclusive().unwrap();
        assert!(!lock.has_exclusive_holder());
    }

    #[test]
    fn double_release_is_an_illegal_state() {
        let lock = SharedExclusiveLock::new();
        lock.acquire_shared();
        lock.release_shared().unwrap();
        let err = lock.release_shared().unwrap_err();
        assert!(matches!(err, CadenceError::ReleaseNotHeld(LockMode::Shared)));
    }

    #[test]
    fn exclusive_timeout_expires_under_contention() {
        let lock = SharedExclusiveLock::new();
        let _shared = lock.shared();
        let err = lock
            .exclusive_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(
            err,
            CadenceError::AcquireTimeout(LockMode::Exclusive)
        ));
    }

    #[test]
    fn cancel_unblocks_a_waiting_acquisition() {
        let lock = SharedExclusiveLock::new();
        let token = CancelToken::new();
        lock.acquire_exclusive();

        let contender = lock.clone();
        let waiter_token = token.clone();
        let waiter = thread::spawn(move || contender.shared_cancellable(&waiter_token).err());

        // Give the waiter time to queue up, then fire the token.
        while lock.queued_requests() == 0 {
            thread::yield_now();
        }
        token.cancel();

        let err = waiter.join().unwrap().expect("wait should abort");
        assert!(matches!(err, CadenceError::Cancelled(LockMode::Shared)));
        lock.release_exclusive().unwrap();
    }

    #[test]
    fn try_shared_respects_queued_exclusive() {
        let lock = SharedExclusiveLock::new();
        let guard = lock.shared();

        let contender = lock.clone();
        let writer = thread::spawn(move || {
            let _exclusive = contender.exclusive();
        });

        while lock.queued_requests() == 0 {
            thread::yield_now();
        }
        // FIFO: a fresh shared request must not overtake the queued writer.
        assert!(lock.try_shared().is_none());

        drop(guard);
        writer.join().unwrap();
    }
}
