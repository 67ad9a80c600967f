//! Backoff between lock attempts

use crate::config::schema::BuildConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter
///
/// Each delay is drawn from `[d/2, d]` where `d` starts at `base` and
/// doubles up to `max`. With `base == max` the sleep is (nearly) fixed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BuildConfig) -> Self {
        let base = Duration::from_millis(config.retry_delay_ms);
        Self {
            base,
            max: Duration::from_millis(config.max_retry_delay_ms).max(base),
        }
    }

    /// Start a fresh backoff sequence
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.base,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(1),
        }
    }
}

/// Iterator state for one wait loop
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
}

impl Backoff {
    /// Next delay to sleep
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.current;
        self.current = (self.current * 2).min(self.policy.max);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms))
    }
}
