//! Retry policies with exponential backoff for exchange API calls.
//!
//! # Per-kind behavior
//!
//! | Kind | Retried | Delay |
//! |------|---------|-------|
//! | `RateLimited` | yes | `Retry-After` capped at `max_backoff`, else backoff |
//! | `AuthenticationFailed` | up to `auth_retry_limit` times | fixed initial backoff |
//! | `ClientError` | never | - |
//! | `ParseError` | never | - |
//! | `ServerError` | yes | exponential backoff |
//! | `ConnectionError` | yes | backoff from half the initial delay |
//! | `Timeout` | yes | backoff from 1.5x the initial delay |

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::application::ports::RetryPolicy;
use crate::domain::error::{ErrorKind, RequestError};

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Dispatch attempts per call, including the first (default: 3).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 10s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed for authentication failures (default: 1).
    pub auth_retry_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            auth_retry_limit: 1,
        }
    }
}

impl RetryConfig {
    /// More attempts, shorter backoff.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            jitter_factor: 0.1,
            auth_retry_limit: 1,
        }
    }

    /// Fewer attempts, longer backoff.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 3.0,
            jitter_factor: 0.2,
            auth_retry_limit: 0,
        }
    }
}

/// [`RetryPolicy`] with exponential backoff, jitter, and per-kind rules.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoffRetry {
    config: RetryConfig,
}

impl ExponentialBackoffRetry {
    /// Create a policy from `config`.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff after the 1-based `attempt`, growing from `base`.
    fn backoff(&self, attempt: u32, base: Duration) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_ms = self.config.max_backoff.as_secs_f64() * 1000.0;
        #[allow(clippy::cast_precision_loss)]
        let base_ms = base.as_millis() as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = if base_ms.is_finite() {
            base_ms.min(max_ms)
        } else {
            max_ms
        };
        let jittered = self.apply_jitter(capped).min(max_ms).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let micros = (jittered * 1000.0).round() as u64;
        Duration::from_micros(micros)
    }

    /// Random value in `[ms * (1 - jitter), ms * (1 + jitter)]`.
    fn apply_jitter(&self, ms: f64) -> f64 {
        let range = ms * self.config.jitter_factor;
        if range <= 0.0 {
            return ms;
        }
        let min = (ms - range).max(0.0);
        let max = ms + range;
        rand::rng().random_range(min..=max)
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn should_retry(&self, attempt: u32, error: &RequestError) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        match error.kind {
            ErrorKind::RateLimited
            | ErrorKind::ServerError
            | ErrorKind::ConnectionError
            | ErrorKind::Timeout => true,
            ErrorKind::AuthenticationFailed => attempt <= self.config.auth_retry_limit,
            ErrorKind::ClientError | ErrorKind::ParseError => false,
        }
    }

    fn delay_for(&self, attempt: u32, error: &RequestError) -> Duration {
        let initial = self.config.initial_backoff;
        match error.kind {
            ErrorKind::RateLimited => error.retry_after.map_or_else(
                || self.backoff(attempt, initial),
                |wait| wait.min(self.config.max_backoff),
            ),
            ErrorKind::AuthenticationFailed => initial,
            ErrorKind::ConnectionError => self.backoff(attempt, initial / 2),
            ErrorKind::Timeout => self.backoff(attempt, initial.mul_f64(1.5)),
            ErrorKind::ServerError | ErrorKind::ClientError | ErrorKind::ParseError => {
                self.backoff(attempt, initial)
            }
        }
    }
}

/// `Retry-After` header parsing.
pub struct RetryAfter;

impl RetryAfter {
    /// Parse a `Retry-After` value.
    ///
    /// Supports delay-seconds (`"120"`) and HTTP-date
    /// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
    #[must_use]
    pub fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        if let Ok(seconds) = value.parse::<f64>()
            && seconds.is_finite()
            && seconds >= 0.0
        {
            return Duration::try_from_secs_f64(seconds).ok();
        }

        let at = DateTime::parse_from_rfc2822(value).ok()?;
        let wait = at.with_timezone(&Utc) - Utc::now();
        Some(wait.to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> ExponentialBackoffRetry {
        ExponentialBackoffRetry::new(RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        })
    }

    fn error(kind: ErrorKind) -> RequestError {
        RequestError::new(kind, None, "test")
    }

    #[test]
    fn default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.max_backoff, Duration::from_secs(10));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn presets_differ() {
        let aggressive = RetryConfig::aggressive();
        let conservative = RetryConfig::conservative();
        assert!(aggressive.max_attempts > conservative.max_attempts);
        assert!(aggressive.initial_backoff < conservative.initial_backoff);
    }

    #[test]
    fn server_error_backs_off_exponentially() {
        let policy = deterministic();
        let err = error(ErrorKind::ServerError);
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, &err), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = deterministic();
        let err = error(ErrorKind::ServerError);
        assert_eq!(policy.delay_for(30, &err), Duration::from_secs(10));
    }

    #[test]
    fn connection_errors_retry_faster() {
        let policy = deterministic();
        assert_eq!(
            policy.delay_for(1, &error(ErrorKind::ConnectionError)),
            Duration::from_millis(50)
        );
        assert_eq!(
            policy.delay_for(1, &error(ErrorKind::Timeout)),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let policy = deterministic();
        let err = error(ErrorKind::RateLimited).with_retry_after(Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(2));

        let without = error(ErrorKind::RateLimited);
        assert_eq!(policy.delay_for(1, &without), Duration::from_millis(100));
    }

    #[test]
    fn retry_after_is_capped_at_max_backoff() {
        let policy = deterministic();
        let err = error(ErrorKind::RateLimited).with_retry_after(Some(Duration::from_secs(3600)));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(10));
    }

    #[test]
    fn non_retryable_kinds() {
        let policy = deterministic();
        assert!(!policy.should_retry(1, &error(ErrorKind::ClientError)));
        assert!(!policy.should_retry(1, &error(ErrorKind::ParseError)));
        assert!(policy.should_retry(1, &error(ErrorKind::ServerError)));
        assert!(policy.should_retry(2, &error(ErrorKind::ConnectionError)));
    }

    #[test]
    fn auth_failures_retry_a_bounded_number_of_times() {
        let policy = deterministic();
        let err = error(ErrorKind::AuthenticationFailed);
        assert!(policy.should_retry(1, &err));
        assert!(!policy.should_retry(2, &err));
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(100));
    }

    #[test]
    fn never_retries_past_max_attempts() {
        let policy = deterministic();
        assert!(!policy.should_retry(3, &error(ErrorKind::ServerError)));
        assert!(!policy.should_retry(4, &error(ErrorKind::RateLimited)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ExponentialBackoffRetry::new(RetryConfig {
            jitter_factor: 0.2,
            ..RetryConfig::default()
        });
        let err = error(ErrorKind::ServerError);
        for _ in 0..100 {
            let delay = policy.delay_for(1, &err);
            assert!(delay >= Duration::from_millis(80));
            assert!(delay <= Duration::from_millis(120));
        }
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(RetryAfter::parse("120"), Some(Duration::from_secs(120)));
        assert_eq!(RetryAfter::parse(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(RetryAfter::parse("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(RetryAfter::parse("soon"), None);
    }

    #[test]
    fn retry_after_out_of_range_is_ignored() {
        assert_eq!(RetryAfter::parse("1e30"), None);
        assert_eq!(RetryAfter::parse("99999999999999999999"), None);
        assert_eq!(RetryAfter::parse("-3"), None);
    }

    #[test]
    fn retry_after_http_date() {
        let future = (Utc::now() + chrono::Duration::seconds(30)).to_rfc2822();
        let parsed = RetryAfter::parse(&future).unwrap();
        assert!(parsed <= Duration::from_secs(30));
        assert!(parsed >= Duration::from_secs(28));

        assert_eq!(
            RetryAfter::parse("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
