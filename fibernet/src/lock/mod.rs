//! Cooperative per-key mutual exclusion.
//!
//! A [`CoroutineLockManager`] hands out at most one [`CoroutineLock`] per
//! `(type, key)`; other callers queue in call order. Dropping a ticket hands
//! the lock to the next live waiter. Consecutive hand-offs count up a
//! *level*; once it reaches [`MAX_NOTIFY_LEVEL`] the next hand-off waits for
//! the manager's next [`update`](CoroutineLockManager::update) and the level
//! starts over at 1.

mod error;
mod lock_type;
mod manager;

pub use error::LockError;
pub use lock_type::CoroutineLockType;
pub use manager::{CoroutineLock, CoroutineLockManager, MAX_NOTIFY_LEVEL, WaitLock};
