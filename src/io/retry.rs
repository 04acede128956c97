// PAKER - Package Acquisition and Integrity Core
// Async I/O Engine - Network Retry Policy

//! Exponential-backoff retry for network operations.
//!
//! File operations never retry; they report and surface. Network
//! transfers retry transient failures with a bounded, exponentially
//! growing delay.

use std::time::Duration;

/// Retry parameters for network operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `attempt` (1-based).
    ///
    /// Returns `None` once the attempt budget is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = self.backoff_factor.powi(attempt as i32 - 1);
        let delay = self.initial_delay.mul_f64(factor);
        Some(delay.min(self.max_delay))
    }

    /// The full backoff schedule, for diagnostics.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .filter_map(|a| self.delay_for_attempt(a))
            .collect()
    }
}

/// Whether an HTTP status is worth retrying.
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Whether a transport-level error is worth retrying.
pub(crate) fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = RetryConfig {
            max_retries: 4,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(500),
        };

        let schedule = config.schedule();
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500), // capped
            ]
        );
    }

    #[test]
    fn test_attempt_budget() {
        let config = RetryConfig::default();
        assert!(config.delay_for_attempt(0).is_none());
        assert!(config.delay_for_attempt(1).is_some());
        assert!(config.delay_for_attempt(config.max_retries).is_some());
        assert!(config.delay_for_attempt(config.max_retries + 1).is_none());
    }

    #[test]
    fn test_transient_status_classes() {
        assert!(is_transient_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_transient_status(reqwest::StatusCode::FORBIDDEN));
    }
}
