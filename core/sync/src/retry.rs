//! Backoff policy deciding when failed queue items may be retried.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use fieldline_common::QueueItem;

/// Backoff configuration for failed queue items.
///
/// An item that has never been attempted is always eligible. After a
/// failure the item waits out an exponentially growing delay, anchored
/// at its `last_attempt_at`, before the dispatcher picks it up again.
/// The attempt budget itself lives on the item; this policy only decides
/// timing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create the default policy: 30s initial, 10min cap, doubling, jittered.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Whether an item has waited out its backoff window.
    pub fn is_eligible(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        if item.attempts == 0 {
            return true;
        }
        let Some(last_attempt_at) = item.last_attempt_at else {
            return true;
        };
        let delay = self.delay_for_attempt(item.attempts - 1);
        let wait = ChronoDuration::milliseconds(delay.as_millis() as i64);
        now - last_attempt_at >= wait
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
