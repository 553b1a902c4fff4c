//! Retry and backoff policy.
//!
//! Two named policies cover every retry loop in the pipeline:
//!
//! - [`RetryConfig::default()`]: bounded attempts. The HTTP layer uses it
//!   for idempotent GETs, which stop at the attempt cap or the request
//!   deadline, whichever comes first.
//! - [`RetryConfig::daemon()`]: infinite attempts. The socket reopen loop,
//!   the outbox UNKNOWN-resolver, and the backfill reader use it - these
//!   must survive a node outage of any length.
//!
//! Every loop checks [`Backoff::exhausted()`] against `max_attempts` after
//! each failure, so the cap is a hard stop wherever it is finite.
//!
//! `POST /transactions/` is never retried by the transport layer - the
//! outbox UNKNOWN-resolver owns at-least-once delivery for sends.

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    /// Set to `usize::MAX` for infinite retries (reconnect loops).
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Infinite retry for long-running reconnect and resolver loops.
    ///
    /// Retries forever with exponential backoff capped at 2 minutes, so a
    /// node outage of any length recovers without a restart.
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        // The exponent must stay finite: unbounded powi overflows to
        // infinity, which Duration::from_secs_f64 rejects.
        let exponent = (attempt - 1).min(64) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs =
            (self.initial_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(delay_secs)
    }
}

/// An escalating backoff state for open-coded retry loops.
///
/// Starts at the config's initial delay and doubles per [`next`](Self::next)
/// up to the cap; [`reset`](Self::reset) returns to the initial delay after
/// a success.
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: usize,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay to sleep before the next attempt.
    pub fn next(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.config.delay_for_attempt(self.attempt)
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of failed attempts since the last reset.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Whether the attempt cap has been reached.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}
