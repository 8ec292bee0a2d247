use backon::BackoffBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const DEFAULT_ATTEMPTS: usize = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_FACTOR: f64 = 1.6;
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(120);

/// Exponential backoff with additive jitter for a single RPC call.
///
/// `attempts` is the total number of calls made, so a policy yields
/// `attempts - 1` delays. Delay `i` is `base_delay * factor^i` plus a jitter
/// drawn uniformly from `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_jitter: Duration,
    /// Fixes the jitter sequence, mostly for tests.
    pub jitter_seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            factor: DEFAULT_FACTOR,
            max_jitter: DEFAULT_MAX_JITTER,
            jitter_seed: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    #[must_use]
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Zero attempts still makes one call.
    pub fn total_attempts(&self) -> usize {
        self.attempts.max(1)
    }

    pub fn base_delay_for(&self, index: usize) -> Duration {
        let exponent = i32::try_from(index).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Lower bound on the time spent sleeping when every attempt fails.
    pub fn minimum_total_delay(&self) -> Duration {
        (0..self.total_attempts() - 1)
            .map(|index| self.base_delay_for(index))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = RetryBackoff;

    fn build(self) -> Self::Backoff {
        let rng = self
            .jitter_seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        RetryBackoff {
            policy: self,
            index: 0,
            rng,
        }
    }
}

#[derive(Debug)]
pub struct RetryBackoff {
    policy: RetryPolicy,
    index: usize,
    rng: StdRng,
}

impl RetryBackoff {
    fn jitter(&mut self) -> Duration {
        let max_ms = u64::try_from(self.policy.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..max_ms))
    }
}

impl Iterator for RetryBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.index + 1 >= self.policy.total_attempts() {
            return None;
        }

        let delay = self
            .policy
            .base_delay_for(self.index)
            .saturating_add(self.jitter());
        self.index += 1;

        Some(delay)
    }
}
