//! Broker submission timeout and retry configuration.

use serde::{Deserialize, Serialize};

/// Submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Timeout for one broker call.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Attempts before an order is declared stuck.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Random jitter (0.2 = +/-20%).
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
    /// Rejected broker orders per contract order before it is no longer
    /// re-decomposed automatically.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
    /// Age after which an unconfirmed reservation is considered abandoned.
    #[serde(default = "default_reservation_timeout")]
    pub reservation_timeout_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_multiplier(),
            jitter_factor: default_jitter(),
            max_rejections: default_max_rejections(),
            reservation_timeout_secs: default_reservation_timeout(),
        }
    }
}

const fn default_timeout() -> u64 {
    5_000
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff() -> u64 {
    1_000
}

const fn default_max_backoff() -> u64 {
    60_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.2
}

const fn default_max_rejections() -> u32 {
    3
}

const fn default_reservation_timeout() -> u64 {
    120
}
