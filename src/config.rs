//! Configuration for the transaction stream.
//!
//! All tunables live in [`StreamConfig`]. The identity of a stream (node
//! endpoint, address filter, mined flag) is *not* configuration - it is part
//! of the durable [`StoredState`](crate::store::StoredState) and is fixed at
//! `create()` time.
//!
//! Durations are given as humantime strings (e.g. `"30s"`, `"500ms"`) so the
//! config can be deserialized from JSON/YAML verbatim.

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable parameters for a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Page size for backfill and tail-hole fetches.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Socket liveness deadline: if no message arrives for this long, the
    /// socket is considered dead and reopened.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: String,

    /// Websocket connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Default deadline for idempotent GET retries.
    #[serde(default = "default_http_deadline")]
    pub http_deadline: String,

    /// Initial retry delay.
    #[serde(default = "default_retry_initial")]
    pub retry_initial: String,

    /// Retry delay ceiling.
    #[serde(default = "default_retry_max")]
    pub retry_max: String,

    /// Retry backoff multiplier.
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,

    /// Interpolation-search rounds before the locator falls back to binary
    /// search.
    #[serde(default = "default_interpolation_rounds")]
    pub interpolation_rounds: u32,

    /// How many times the locator may restart (after observing deletions
    /// mid-search) before giving up.
    #[serde(default = "default_locator_restarts")]
    pub locator_restarts: u32,
}

fn default_page_size() -> u64 {
    50
}

fn default_ping_timeout() -> String {
    "30s".to_string()
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_http_deadline() -> String {
    "30s".to_string()
}

fn default_retry_initial() -> String {
    "250ms".to_string()
}

fn default_retry_max() -> String {
    "30s".to_string()
}

fn default_retry_factor() -> f64 {
    2.0
}

fn default_interpolation_rounds() -> u32 {
    3
}

fn default_locator_restarts() -> u32 {
    10
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            ping_timeout: default_ping_timeout(),
            connect_timeout: default_connect_timeout(),
            http_deadline: default_http_deadline(),
            retry_initial: default_retry_initial(),
            retry_max: default_retry_max(),
            retry_factor: default_retry_factor(),
            interpolation_rounds: default_interpolation_rounds(),
            locator_restarts: default_locator_restarts(),
        }
    }
}

impl StreamConfig {
    /// Fast timings for tests.
    pub fn for_testing() -> Self {
        Self {
            page_size: 10,
            ping_timeout: "500ms".to_string(),
            connect_timeout: "200ms".to_string(),
            http_deadline: "1s".to_string(),
            retry_initial: "10ms".to_string(),
            retry_max: "50ms".to_string(),
            retry_factor: 2.0,
            interpolation_rounds: 3,
            locator_restarts: 10,
        }
    }

    /// Parse the liveness deadline.
    pub fn ping_timeout_duration(&self) -> Duration {
        parse_duration(&self.ping_timeout, Duration::from_secs(30))
    }

    /// Parse the websocket connect timeout.
    pub fn connect_timeout_duration(&self) -> Duration {
        parse_duration(&self.connect_timeout, Duration::from_secs(10))
    }

    /// Parse the GET retry deadline.
    pub fn http_deadline_duration(&self) -> Duration {
        parse_duration(&self.http_deadline, Duration::from_secs(30))
    }

    /// Retry schedule for idempotent GETs: bounded attempts, additionally
    /// capped by the request deadline.
    pub fn http_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: parse_duration(&self.retry_initial, Duration::from_millis(250)),
            max_delay: parse_duration(&self.retry_max, Duration::from_secs(30)),
            backoff_factor: self.retry_factor,
            attempt_timeout: self.connect_timeout_duration(),
            ..RetryConfig::default()
        }
    }

    /// Retry schedule for the loops that must never give up: socket
    /// reconnect, the outbox UNKNOWN-resolver, and the backfill reader.
    pub fn reconnect_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: parse_duration(&self.retry_initial, Duration::from_millis(250)),
            max_delay: parse_duration(&self.retry_max, Duration::from_secs(30)),
            backoff_factor: self.retry_factor,
            attempt_timeout: self.connect_timeout_duration(),
            ..RetryConfig::daemon()
        }
    }
}

fn parse_duration(s: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(s).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.ping_timeout_duration(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout_duration(), Duration::from_secs(10));
        assert_eq!(config.interpolation_rounds, 3);
    }

    #[test]
    fn test_duration_parsing_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let config = StreamConfig {
                ping_timeout: input.to_string(),
                ..Default::default()
            };
            assert_eq!(
                config.ping_timeout_duration(),
                expected,
                "failed for input: {input}"
            );
        }
    }

    #[test]
    fn test_duration_parsing_invalid_fallback() {
        let config = StreamConfig {
            ping_timeout: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(config.ping_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_http_retry_is_bounded() {
        let config = StreamConfig::default();
        let retry = config.http_retry();
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert_eq!(retry.backoff_factor, 2.0);
        assert_eq!(retry.max_attempts, RetryConfig::default().max_attempts);
    }

    #[test]
    fn test_reconnect_retry_is_infinite() {
        let config = StreamConfig::default();
        let retry = config.reconnect_retry();
        assert_eq!(retry.max_attempts, usize::MAX);
        // Delays come from the config knobs, not the daemon preset.
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_for_testing_is_fast() {
        let config = StreamConfig::for_testing();
        assert!(config.ping_timeout_duration() < Duration::from_secs(1));
        assert!(config.http_retry().initial_delay < Duration::from_millis(100));
        assert!(config.reconnect_retry().initial_delay < Duration::from_millis(100));
        assert_eq!(config.page_size, 10);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = StreamConfig {
            page_size: 25,
            ping_timeout: "10s".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: StreamConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.page_size, 25);
        assert_eq!(parsed.ping_timeout, "10s");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let parsed: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.page_size, 50);
        assert_eq!(parsed.ping_timeout, "30s");
    }
}
