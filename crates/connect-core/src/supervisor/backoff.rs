// ── Reconnect backoff ──
//
// base * factor^attempt, scaled by a random factor in [1-j, 1+j], clamped
// to the cap. Each delay is also floored at the previous one so a run of
// failures never shortens its wait.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Backoff state for one supervisor.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Consecutive failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 0.5);
        let scale = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        self.next_delay_scaled(scale)
    }

    fn next_delay_scaled(&mut self, scale: f64) -> Duration {
        let growth = self.config.factor.max(1).saturating_pow(self.attempt);
        let raw = self
            .config
            .base
            .saturating_mul(growth)
            .min(self.config.max);

        let delay = raw.mul_f64(scale).min(self.config.max).max(self.last);

        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Back to `base` after a stable connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}
