//! Order lock configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long `acquire` waits for a held lock before giving up.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    /// Delay between acquisition attempts while waiting.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Age after which a lock is treated as left behind by a dead process.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout(),
            poll_interval_ms: default_poll_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl LockConfig {
    /// Acquisition timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stale lock age.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

const fn default_acquire_timeout() -> u64 {
    0
}

const fn default_poll_interval() -> u64 {
    50
}

const fn default_stale_after() -> u64 {
    300
}
