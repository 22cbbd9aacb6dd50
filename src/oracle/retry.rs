//! Deadline-and-retry policy for oracle calls.
//!
//! A [`RetryPolicy`] bounds every attempt with a timeout and retries
//! transient failures with capped exponential backoff. [`RetryingOracle`]
//! applies a policy to any [`Oracle`], so the repair loop never retries by
//! hand.
//!
//! ```text
//! attempt 1 ──fail(retryable)──> sleep(backoff 1) ──> attempt 2 ──> ...
//!     │                                                   │
//!     └──fail(permanent)──> Err                           └──ok──> Ok
//! ```

use super::{Oracle, OracleError, OracleRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Backoff Constants and Calculation
// ============================================================================

/// Base backoff delay in milliseconds for retry attempts.
pub const RETRY_BACKOFF_BASE_MS: u64 = 2000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 120;

/// Calculate exponential backoff delay for a given attempt number.
///
/// `attempt` is 1-indexed; the first retry waits `base_ms`, each further
/// retry multiplies by `multiplier`, and the result never exceeds `max_ms`.
///
/// # Example
///
/// ```
/// use mender::oracle::calculate_backoff;
/// use std::time::Duration;
///
/// assert_eq!(calculate_backoff(1, 2000, 2, 30_000), Duration::from_millis(2000));
/// assert_eq!(calculate_backoff(3, 2000, 2, 30_000), Duration::from_millis(8000));
/// assert_eq!(calculate_backoff(10, 2000, 2, 30_000), Duration::from_millis(30_000));
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, multiplier: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = multiplier.saturating_pow(exponent);
    let delay = base_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(max_ms))
}

/// Retry policy applied to every oracle call.
///
/// Loaded from the `[retry]` table of `mender.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: u64,

    /// Deadline for a single attempt; `None` waits indefinitely.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    RETRY_BACKOFF_BASE_MS
}

fn default_max_backoff_ms() -> u64 {
    MAX_BACKOFF_MS
}

fn default_multiplier() -> u64 {
    BACKOFF_MULTIPLIER
}

fn default_attempt_timeout_secs() -> Option<u64> {
    Some(DEFAULT_ATTEMPT_TIMEOUT_SECS)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt with no deadline.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout_secs: None,
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff base and cap in milliseconds.
    #[must_use]
    pub fn with_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.initial_backoff_ms = initial;
        self.max_backoff_ms = max;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, secs: Option<u64>) -> Self {
        self.attempt_timeout_secs = secs;
        self
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns the offending field and reason.
    pub fn validate(&self) -> std::result::Result<(), (String, String)> {
        if self.max_attempts == 0 {
            return Err(("retry.max_attempts".into(), "must be at least 1".into()));
        }
        if self.multiplier == 0 {
            return Err(("retry.multiplier".into(), "must be at least 1".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err((
                "retry.initial_backoff_ms".into(),
                format!(
                    "{} exceeds max_backoff_ms {}",
                    self.initial_backoff_ms, self.max_backoff_ms
                ),
            ));
        }
        if self.attempt_timeout_secs == Some(0) {
            return Err((
                "retry.attempt_timeout_secs".into(),
                "must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-indexed).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_backoff_ms,
            self.multiplier,
            self.max_backoff_ms,
        )
    }

    /// Delay to use after `error` on retry number `attempt`.
    ///
    /// A server-provided hint wins over the computed backoff but is still
    /// capped at `max_backoff_ms`.
    #[must_use]
    pub fn delay_for(&self, error: &OracleError, attempt: u32) -> Duration {
        let cap = Duration::from_millis(self.max_backoff_ms);
        error
            .retry_after()
            .map_or_else(|| self.backoff(attempt), |hint| hint.min(cap))
    }
}

/// Oracle decorator that applies a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryingOracle<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: Oracle> RetryingOracle<O> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped oracle.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// The applied policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, request: &OracleRequest) -> Result<String, OracleError> {
        match self.policy.attempt_timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), self.inner.generate(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(OracleError::Timeout { timeout_secs: secs }),
                }
            }
            None => self.inner.generate(request).await,
        }
    }
}

#[async_trait]
impl<O: Oracle> Oracle for RetryingOracle<O> {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(request).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!("Oracle {} succeeded on attempt {}", request.purpose, attempt);
                    }
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(&e, attempt);
                    warn!(
                        "Oracle {} attempt {}/{} failed: {}. Retrying in {}ms",
                        request.purpose,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockOracle;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_backoff_ms(1, 5)
            .with_attempt_timeout(None)
    }

    fn request() -> OracleRequest {
        OracleRequest::new("classify", "prompt", serde_json::json!({}))
    }

    #[test]
    fn test_calculate_backoff_exponential() {
        assert_eq!(calculate_backoff(1, 2000, 2, 30_000), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(2, 2000, 2, 30_000), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(3, 2000, 2, 30_000), Duration::from_millis(8000));
        assert_eq!(calculate_backoff(4, 2000, 2, 30_000), Duration::from_millis(16_000));
    }

    #[test]
    fn test_calculate_backoff_capped() {
        assert_eq!(calculate_backoff(5, 2000, 2, 30_000), Duration::from_millis(30_000));
        assert_eq!(calculate_backoff(60, 2000, 2, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_calculate_backoff_attempt_zero_uses_base() {
        assert_eq!(calculate_backoff(0, 2000, 2, 30_000), Duration::from_millis(2000));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff_ms, 2000);
        assert_eq!(policy.max_backoff_ms, 30_000);
        assert_eq!(policy.attempt_timeout_secs, Some(120));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validate() {
        assert_eq!(
            RetryPolicy::default()
                .with_max_attempts(0)
                .validate()
                .unwrap_err()
                .0,
            "retry.max_attempts"
        );
        assert_eq!(
            RetryPolicy::default()
                .with_backoff_ms(50_000, 1_000)
                .validate()
                .unwrap_err()
                .0,
            "retry.initial_backoff_ms"
        );
        assert_eq!(
            RetryPolicy::default()
                .with_attempt_timeout(Some(0))
                .validate()
                .unwrap_err()
                .0,
            "retry.attempt_timeout_secs"
        );
    }

    #[test]
    fn test_delay_for_prefers_capped_hint() {
        let policy = RetryPolicy::default();
        let hinted = OracleError::RateLimited {
            message: "slow".into(),
            retry_after_secs: Some(5),
        };
        assert_eq!(policy.delay_for(&hinted, 1), Duration::from_secs(5));

        let huge = OracleError::RateLimited {
            message: "slow".into(),
            retry_after_secs: Some(3600),
        };
        assert_eq!(policy.delay_for(&huge, 1), Duration::from_millis(30_000));

        let plain = OracleError::ServerError {
            message: "boom".into(),
        };
        assert_eq!(policy.delay_for(&plain, 2), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retrying_oracle_recovers_from_transient_failures() {
        let mock = MockOracle::new()
            .with_failure(OracleError::ServerError {
                message: "503".into(),
            })
            .with_failure(OracleError::ConnectionError {
                message: "reset".into(),
            })
            .with_response("ok");
        let oracle = RetryingOracle::new(mock, fast_policy(3));

        let result = oracle.generate(&request()).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(oracle.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn test_retrying_oracle_respects_max_attempts() {
        let mock = MockOracle::new()
            .with_failure(OracleError::ServerError { message: "1".into() })
            .with_failure(OracleError::ServerError { message: "2".into() })
            .with_response("too late");
        let oracle = RetryingOracle::new(mock, fast_policy(2));

        let result = oracle.generate(&request()).await;
        assert!(matches!(result, Err(OracleError::ServerError { .. })));
        assert_eq!(oracle.inner().call_count(), 2);
    }

    #[tokio::test]
    async fn test_retrying_oracle_does_not_retry_permanent_errors() {
        let mock = MockOracle::new()
            .with_failure(OracleError::AuthenticationFailed {
                message: "bad key".into(),
            })
            .with_response("never reached");
        let oracle = RetryingOracle::new(mock, fast_policy(5));

        let result = oracle.generate(&request()).await;
        assert!(matches!(
            result,
            Err(OracleError::AuthenticationFailed { .. })
        ));
        assert_eq!(oracle.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_retrying_oracle_times_out_slow_attempts() {
        let mock = MockOracle::new()
            .with_response("slow")
            .with_delay(Duration::from_secs(5));
        let policy = fast_policy(1).with_attempt_timeout(Some(1));
        let oracle = RetryingOracle::new(mock, policy);

        let result = oracle.generate(&request()).await;
        assert_eq!(result, Err(OracleError::Timeout { timeout_secs: 1 }));
    }

    #[test]
    fn test_policy_deserialize_partial() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.multiplier, 2);
        assert_eq!(policy.attempt_timeout_secs, Some(120));
    }
}
