//! Lock errors.

use std::time::Duration;

use super::CoroutineLockType;
use fibernet_core::error_code;

/// Errors returned while waiting for a coroutine lock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The waiter was still queued when its deadline passed.
    #[error("coroutine lock {lock_type}/{key} timed out after {after:?}, possible deadlock")]
    Timeout {
        /// Lock domain.
        lock_type: CoroutineLockType,
        /// Lock key.
        key: u64,
        /// Timeout the waiter asked for.
        after: Duration,
    },

    /// The manager was dropped while the waiter was queued.
    #[error("coroutine lock manager dropped")]
    ManagerDropped,
}

impl LockError {
    /// Error code equivalent, for replies and logs.
    pub fn error_code(&self) -> i32 {
        match self {
            LockError::Timeout { .. } => error_code::ERR_LOCK_TIMEOUT,
            LockError::ManagerDropped => error_code::ERR_SESSION_DISPOSED,
        }
    }
}
