//! Retry policy with exponential backoff, and cancellable waiting.
//!
//! Delays grow as `base * 2^(attempt-1)`, capped at `max_delay_ms`, with ±20%
//! random jitter.

use crate::error::FetchError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry behavior for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Fail fast, mostly for tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Jittered delay after failed attempt number `attempt`, still capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let jitter_factor = rand::thread_rng().gen_range(0.8..=1.2);
        let jittered_ms = ((nominal * jitter_factor) as u64).min(self.max_delay_ms);
        Duration::from_millis(jittered_ms)
    }
}

/// Cooperative cancellation flag shared by every worker of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Waits between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FetchError>;
}

/// Real sleeper; wakes every `SLICE` to check for cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl ThreadSleeper {
    const SLICE: Duration = Duration::from_millis(100);
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FetchError> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let step = remaining.min(Self::SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_nominal_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        };
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.nominal_delay(4), Duration::from_millis(5_000));
        assert_eq!(policy.nominal_delay(60), Duration::from_millis(5_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        };
        for _ in 0..200 {
            let delay = policy.backoff_delay(2).as_millis();
            assert!((1_600..=2_400).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 1_500,
        };
        for _ in 0..200 {
            assert!(policy.backoff_delay(4) <= Duration::from_millis(1_500));
        }
    }

    #[test]
    fn test_thread_sleeper_waits() {
        let start = Instant::now();
        ThreadSleeper
            .sleep(Duration::from_millis(250), &CancelToken::new())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_thread_sleeper_cancels() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            trigger.cancel();
        });

        let start = Instant::now();
        let result = ThreadSleeper.sleep(Duration::from_secs(10), &cancel);
        handle.join().unwrap();

        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
