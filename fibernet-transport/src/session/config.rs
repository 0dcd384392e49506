//! Configuration structures for session behavior.

use std::time::Duration;

/// Configuration for a [`Session`](super::Session).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Dispose the session after this long without traffic in either
    /// direction.
    ///
    /// Set to `Duration::ZERO` to disable idle checking.
    pub idle_timeout: Duration,

    /// How often the idle checker wakes up.
    pub idle_check_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::ZERO,
            idle_check_interval: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Enable idle checking with the given timeout and check interval.
    pub fn with_idle_timeout(mut self, timeout: Duration, check_interval: Duration) -> Self {
        self.idle_timeout = timeout;
        self.idle_check_interval = check_interval;
        self
    }

    /// Whether the idle checker runs.
    pub fn idle_check_enabled(&self) -> bool {
        self.idle_timeout > Duration::ZERO
    }
}
