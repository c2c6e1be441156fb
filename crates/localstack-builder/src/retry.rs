//! Bounded retry with exponential backoff
//!
//! Only network-bound steps (clone, fetch, sync, upload) are retried.
//! Compile and packaging stages never go through this.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Retry ceiling and backoff shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,

    /// Delay after the first failure; doubles each attempt (default: 1s)
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the ceiling is hit.
    ///
    /// `op` receives the 1-based attempt number. On exhaustion the last
    /// error is returned.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}s",
                        label,
                        attempt,
                        attempts,
                        e,
                        delay.as_secs()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_succeeds_within_ceiling() {
        let policy = RetryPolicy::immediate(3);
        let mut seen = Vec::new();
        let result: Result<u32, String> = policy.run("clone", |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err("network".to_string())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::immediate(2);
        let result: Result<(), String> =
            policy.run("fetch", |attempt| Err(format!("fail {}", attempt)));
        assert_eq!(result, Err("fail 2".to_string()));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::immediate(0);
        let mut calls = 0;
        let _: Result<(), &str> = policy.run("x", |_| {
            calls += 1;
            Err("no")
        });
        assert_eq!(calls, 1);
    }
}
