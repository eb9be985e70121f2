//! Backoff policy for scheduled retry attempts.
//!
//! Implements exponential backoff with configurable parameters.

use std::time::Duration;

use crate::config::RecoverySettings;

/// Exponential backoff with a hard cap.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Initial backoff duration in seconds.
    pub base_delay_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_delay_secs: u64,
    /// Multiplier applied to the backoff after each retry.
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Create a new BackoffPolicy from configuration settings.
    pub fn new(settings: &RecoverySettings) -> Self {
        Self {
            base_delay_secs: settings.backoff_base_delay_seconds,
            max_delay_secs: settings.backoff_max_delay_seconds,
            multiplier: settings.backoff_multiplier,
        }
    }

    /// Calculate the backoff in seconds for a given retry count.
    ///
    /// Uses exponential backoff: `base_delay * multiplier^retry_count`,
    /// capped at `max_delay_secs`.
    pub fn delay_secs(&self, retry_count: u32) -> u64 {
        let delay = self.base_delay_secs as f64 * self.multiplier.powi(retry_count as i32);
        delay.min(self.max_delay_secs as f64) as u64
    }

    /// The backoff as a [`Duration`], ready for the retry runner.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        Duration::from_secs(self.delay_secs(retry_count))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&RecoverySettings::default())
    }
}
