//! Lock domains.

use std::fmt;

/// Namespace of a coroutine lock. Keys only collide within one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoroutineLockType {
    /// Serializes message handling per entity (key: instance id).
    Mailbox,
    /// Serializes sends through a location sender (key: location key).
    MessageLocationSender,
    /// Serializes location directory updates (key: location key).
    Location,
    /// Serializes logins per account.
    Login,
    /// Serializes database access per record.
    Db,
    /// Serializes resource loading per resource.
    Resources,
    /// Serializes lockstep room operations per room.
    LockStep,
}

impl fmt::Display for CoroutineLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
