//! RAII guards that release their lock mode on drop.

use std::marker::PhantomData;

use tracing::error;

use crate::lock::SharedExclusiveLock;

/// Holds shared access until dropped.
#[must_use = "shared access is released as soon as the guard is dropped"]
pub struct SharedGuard<'a> {
    pub(crate) lock: &'a SharedExclusiveLock,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_shared() {
            // Unreachable while the guard exists; never panic in drop.
            error!("shared guard release failed: {err}");
        }
    }
}

impl std::fmt::Debug for SharedGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedGuard")
            .field("shared_holders", &self.lock.shared_holders())
            .finish()
    }
}

/// Holds exclusive access until dropped.
///
/// The exclusive owner is identified by thread id, so the guard must stay on
/// the thread that acquired it; it is deliberately `!Send`.
#[must_use = "exclusive access is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    pub(crate) lock: &'a SharedExclusiveLock,
    pub(crate) _not_send: PhantomData<*const ()>,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_exclusive() {
            error!("exclusive guard release failed: {err}");
        }
    }
}

impl std::fmt::Debug for ExclusiveGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use crate::lock::SharedExclusiveLock;

    #[test]
    fn shared_guard_releases_on_drop() {
        let lock = SharedExclusiveLock::new();
        {
            let _guard = lock.shared();
            assert_eq!(lock.shared_holders(), 1);
        }
        assert_eq!(lock.shared_holders(), 0);
    }

    #[test]
    fn exclusive_guard_releases_on_drop() {
        let lock = SharedExclusiveLock::new();
        {
            let _guard = lock.exclusive();
            assert!(lock.has_exclusive_holder());
        }
        assert!(!lock.has_exclusive_holder());
    }

    #[test]
    fn guards_format_for_debugging() {
        let lock = SharedExclusiveLock::new();

        let shared = lock.shared();
        assert!(format!("{shared:?}").contains("SharedGuard"));
        drop(shared);

        // Debug on the result type lets tests unwrap timeout errors.
        let exclusive = lock
            .exclusive_timeout(std::time::Duration::from_millis(20))
            .unwrap();
        assert!(format!("{exclusive:?}").contains("ExclusiveGuard"));
    }

    #[test]
    fn nested_shared_guards_release_independently() {
        let lock = SharedExclusiveLock::new();
        let outer = lock.shared();
        {
            let _inner = lock.shared();
            assert_eq!(lock.shared_holders(), 2);
        }
        assert_eq!(lock.shared_holders(), 1);
        drop(outer);
        assert_eq!(lock.shared_holders(), 0);
    }
}
