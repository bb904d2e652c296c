// Backoff between the attempts of one job run

use crate::config::SchedulerConfig;
use rand::Rng;
use std::time::Duration;

/// Strategy deciding how long a job run waits before its next attempt
pub trait RetryStrategy: Send + Sync {
    /// Delay after `attempt` (1-based) failed and before attempt `attempt + 1`
    fn delay_after(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with jitter: base, base*3, base*9, ... capped at max
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn with_config(base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_scheduler_config(config: &SchedulerConfig) -> Self {
        Self::with_config(
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
            config.retry_jitter_factor,
        )
    }

    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay_ms
            .saturating_mul(3_u64.pow(exponent))
            .min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return base_delay_ms;
        }

        let mut rng = rand::thread_rng();
        base_delay_ms + rng.gen_range(0..=jitter_range_ms)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.add_jitter_ms(self.calculate_base_delay(attempt)))
    }
}

/// Same delay after every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryStrategy for FixedDelay {
    fn delay_after(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
