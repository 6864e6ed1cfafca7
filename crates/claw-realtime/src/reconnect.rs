//! Reconnection policy: capped exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for reconnection behavior.
///
/// Immutable once handed to a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicyConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential part of the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
    /// Jitter is drawn uniformly from `[0, jitter_ms)`.
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter_ms: 1_000,
        }
    }
}

impl ReconnectPolicyConfig {
    /// Set the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the jitter span.
    #[must_use]
    pub const fn with_jitter(mut self, span: Duration) -> Self {
        self.jitter_ms = span.as_millis() as u64;
        self
    }

    /// Base delay as a [`Duration`].
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a [`Duration`].
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Stateless retry policy.
///
/// Attempts are 1-based: attempt 1 is the first retry after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    config: ReconnectPolicyConfig,
}

impl ReconnectPolicy {
    /// Create a policy from its configuration.
    #[must_use]
    pub const fn new(config: ReconnectPolicyConfig) -> Self {
        Self { config }
    }

    /// The configuration this policy was built from.
    #[must_use]
    pub const fn config(&self) -> &ReconnectPolicyConfig {
        &self.config
    }

    /// `base * 2^(attempt - 1)`, clamped to `max_delay`. No jitter.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1_u64 << exponent;
        let raw = self.config.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(raw.min(self.config.max_delay_ms))
    }

    /// Full delay for `attempt`: the capped delay plus thread-local jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Full delay for `attempt` drawing jitter from `rng`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.config.jitter_ms)
        };
        self.capped_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Whether `attempt` is still within the retry budget.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectPolicyConfig::default())
    }
}
