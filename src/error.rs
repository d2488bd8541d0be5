//! Error types for the cadence primitives.

use crate::lock::LockMode;

/// Top-level error type for lock and scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// The caller released a lock mode it does not currently hold.
    #[error("cannot release {0} lock: not held by this caller")]
    ReleaseNotHeld(LockMode),

    /// A blocked acquisition was aborted by its cancel token.
    #[error("{0} lock acquisition cancelled")]
    Cancelled(LockMode),

    /// A bounded acquisition wait expired before the lock was granted.
    #[error("timed out waiting for {0} lock")]
    AcquireTimeout(LockMode),

    /// Scheduler error (task registration, state persistence, worker handle).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn release_not_held_names_the_mode() {
        let err = CadenceError::ReleaseNotHeld(LockMode::Shared);
        assert!(err.to_string().contains("shared"));

        let err = CadenceError::ReleaseNotHeld(LockMode::Exclusive);
        assert!(err.to_string().contains("exclusive"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CadenceError = io.into();
        assert!(matches!(err, CadenceError::Io(_)));
    }
}
