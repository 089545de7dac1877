//! Exponential backoff for broker submission retries.
//!
//! Attempt counts live on the broker order itself, so the backoff is a pure
//! function of the attempt number rather than a stateful iterator.
//!
//! | Retried | Not retried |
//! |---------|-------------|
//! | Submission timeout | Order rejected by broker |
//! | Connection error | Unknown broker reference |

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::SubmissionConfig;

/// Retry policy for broker submissions.
#[derive(Debug, Clone)]
pub struct SubmissionRetryPolicy {
    /// Attempts before the order is declared stuck.
    pub max_attempts: u32,
    /// Backoff after the first failure.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Jitter factor (0.2 = +/-20%).
    pub jitter_factor: f64,
}

impl Default for SubmissionRetryPolicy {
    fn default() -> Self {
        Self::from_config(&SubmissionConfig::default())
    }
}

impl SubmissionRetryPolicy {
    /// Build from configuration.
    #[must_use]
    pub const fn from_config(config: &SubmissionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Whether `failed_attempts` failures exhaust the policy.
    #[must_use]
    pub const fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    /// Backoff without jitter after the `failed_attempts`-th failure (1-based).
    #[must_use]
    pub fn base_backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as u64;
        let backoff = (initial_ms * multiplier) as u64;
        Duration::from_millis(backoff.min(max_ms))
    }

    /// Backoff with jitter, capped at `max_backoff`.
    #[must_use]
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let base_ms = self.base_backoff(failed_attempts).as_millis() as f64;
        let jitter_range = base_ms * self.jitter_factor;
        let min = (base_ms - jitter_range).max(0.0);
        let max = base_ms + jitter_range;
        let jittered = if max > min {
            rand::rng().random_range(min..=max) as u64
        } else {
            base_ms as u64
        };
        Duration::from_millis(jittered.min(self.max_backoff.as_millis() as u64))
    }

    /// Earliest time for the next attempt after `failed_attempts` failures.
    #[must_use]
    pub fn retry_at(&self, now: DateTime<Utc>, failed_attempts: u32) -> DateTime<Utc> {
        let backoff = chrono::Duration::from_std(self.backoff(failed_attempts))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(backoff).unwrap_or(now)
    }
}
