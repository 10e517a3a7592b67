//! Retry utilities with exponential backoff and jitter.
//!
//! [`Backoff`] is a bare delay sequence for loops that decide themselves
//! when to go around again. The optimistic-concurrency loops use it to space
//! out attempts after a revision conflict without ever giving up, and the
//! BlockRequest controller uses one per request to pace its requeues.
//!
//! # Example
//!
//! ```ignore
//! use coil_common::retry::RetryConfig;
//!
//! let mut backoff = RetryConfig::conflict().backoff();
//! loop {
//!     if try_commit().await? {
//!         break;
//!     }
//!     backoff.wait().await;
//! }
//! ```

use std::time::Duration;

use rand::Rng;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Profile for revision-conflict loops
    ///
    /// Unbounded, and short: a conflict means another writer just
    /// committed, so the next attempt is expected to succeed quickly.
    pub fn conflict() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    /// Start a delay sequence following this configuration
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Jittered exponential delay sequence
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Create a sequence starting at `config.initial_delay`
    pub fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            delay,
        }
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next jittered delay, or None once `max_attempts` is reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }

        // Add jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);

        // Exponential backoff, capped at max_delay
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );
        Some(jittered)
    }

    /// Sleep for the next delay; returns false once attempts are exhausted
    pub async fn wait(&mut self) -> bool {
        match self.next_delay() {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_delays_are_jittered_and_capped() {
        let mut backoff = fast(0).backoff();
        for _ in 0..20 {
            let delay = backoff.next_delay().unwrap();
            // max_delay * 1.5 is the upper bound after jitter
            assert!(delay <= Duration::from_millis(15), "delay {delay:?} too long");
        }
        assert_eq!(backoff.attempt(), 20);
    }

    #[test]
    fn test_conflict_profile_never_gives_up() {
        let config = RetryConfig::conflict();
        assert_eq!(config.max_attempts, 0);
        assert!(config.max_delay <= Duration::from_millis(100));

        let mut backoff = config.backoff();
        assert!((0..1000).all(|_| backoff.next_delay().is_some()));
    }

    #[tokio::test]
    async fn test_backoff_wait_stops_at_max_attempts() {
        let mut backoff = fast(3).backoff();
        assert!(backoff.wait().await);
        assert!(backoff.wait().await);
        assert!(!backoff.wait().await);
    }
}
