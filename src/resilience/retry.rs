// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with classification-aware exponential backoff.
//!
//! Every failure is classified before it is retried. Errors that don't match
//! the policy's [`RetryClassifier`] (or that report themselves as permanent via
//! [`Retryable::is_permanent`]) are returned after the first attempt, so
//! "not found" and validation failures never burn retries.
//!
//! # Example
//!
//! ```
//! use hybrid_resolver::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::ledger();
//! assert_eq!(policy.max_retries, 3);
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10)); // capped
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;

/// Errors the retry executor can classify.
pub trait Retryable: std::fmt::Display {
    /// Numeric or textual error code reported by the remote side, if any.
    fn error_code(&self) -> Option<String> {
        None
    }

    /// Permanent errors are never retried, whatever the classifier says.
    fn is_permanent(&self) -> bool {
        false
    }
}

/// Decides whether a failure is transient.
///
/// A failure is retryable when its message contains one of the configured
/// substrings (case-insensitive) or its code equals one of the configured
/// codes.
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    messages: Vec<String>,
    codes: Vec<String>,
    match_all: bool,
}

/// Transient failure markers seen from RPC endpoints and HTTP gateways.
const TRANSIENT_MESSAGES: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "connection reset",
    "connection refused",
    "econnreset",
    "etimedout",
    "socket hang up",
    "temporarily unavailable",
    "service unavailable",
    "bad gateway",
    "header not found",
];

const TRANSIENT_CODES: &[&str] = &[
    "429",
    "502",
    "503",
    "504",
    "-32005",
    "-32603",
    "NETWORK_ERROR",
    "TIMEOUT",
    "SERVER_ERROR",
];

impl Default for RetryClassifier {
    fn default() -> Self {
        Self {
            messages: TRANSIENT_MESSAGES.iter().map(|s| s.to_string()).collect(),
            codes: TRANSIENT_CODES.iter().map(|s| s.to_string()).collect(),
            match_all: false,
        }
    }
}

impl RetryClassifier {
    /// Classifier with no markers: nothing is retried.
    #[must_use]
    pub fn none() -> Self {
        Self {
            messages: Vec::new(),
            codes: Vec::new(),
            match_all: false,
        }
    }

    /// Retry every error that isn't permanent (used for backend connects).
    #[must_use]
    pub fn any() -> Self {
        Self {
            match_all: true,
            ..Self::none()
        }
    }

    #[must_use]
    pub fn with_message(mut self, fragment: &str) -> Self {
        self.messages.push(fragment.to_lowercase());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.codes.push(code.to_string());
        self
    }

    pub fn is_retryable<E: Retryable + ?Sized>(&self, err: &E) -> bool {
        if err.is_permanent() {
            return false;
        }
        if self.match_all {
            return true;
        }
        if let Some(code) = err.error_code() {
            if self.codes.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
                return true;
            }
        }
        let message = err.to_string().to_lowercase();
        self.messages.iter().any(|m| message.contains(m.as_str()))
    }
}

/// Backoff configuration for one call-site.
///
/// Use the preset constructors for common patterns:
/// - [`RetryPolicy::ledger()`] - ground-truth reads (3 retries, 1s → 10s)
/// - [`RetryPolicy::index()`] - secondary index calls (fast, few retries)
/// - [`RetryPolicy::startup()`] - backend connections, retries any error
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` attempts in total
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub classifier: RetryClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ledger()
    }
}

impl RetryPolicy {
    /// Ground-truth reads: 3 retries, 1s initial delay doubling up to 10s.
    #[must_use]
    pub fn ledger() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            classifier: RetryClassifier::default(),
        }
    }

    /// Index lookups: the index is advisory, so give up quickly.
    #[must_use]
    pub fn index() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            classifier: RetryClassifier::default(),
        }
    }

    /// Backend connections during startup. Fails after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            classifier: RetryClassifier::any(),
        }
    }

    /// Ledger defaults overridden by configuration.
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            max_retries: config.retry_max_retries,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            backoff_multiplier: config.retry_backoff_multiplier,
            classifier: RetryClassifier::default(),
        }
    }

    /// Per-invocation override of the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Delay inserted after failed attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled.max(0.0).round() as u64)
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            classifier: RetryClassifier::default(),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// policy. Returns the last error on failure.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempt);
                }
                return Ok(val);
            }
            Err(err) => {
                if !policy.classifier.is_retryable(&err) {
                    debug!(operation = operation_name, error = %err, "Not retryable, failing fast");
                    crate::metrics::record_retry(operation_name, "permanent");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        "Operation '{}' failed after {} attempts: {}",
                        operation_name,
                        attempt + 1,
                        err
                    );
                    crate::metrics::record_retry(operation_name, "exhausted");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempt + 1,
                    policy.max_retries + 1,
                    err,
                    delay
                );
                crate::metrics::record_retry(operation_name, "retried");

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        message: String,
        code: Option<String>,
    }

    impl TestError {
        fn transient(msg: &str) -> Self {
            Self { message: msg.to_string(), code: None }
        }

        fn coded(code: &str) -> Self {
            Self { message: "rpc error".to_string(), code: Some(code.to_string()) }
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl Retryable for TestError {
        fn error_code(&self) -> Option<String> {
            self.code.clone()
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryPolicy::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryPolicy::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError::transient("network timeout"))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_after_max_retries_plus_one() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let policy = RetryPolicy::test().with_max_retries(2);

        let result: Result<i32, TestError> = retry(
            "test_op",
            &policy,
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::transient("429 too many requests"))
                }
            },
        ).await;

        assert!(result.unwrap_err().message.contains("too many requests"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_after_one_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryPolicy::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::transient("execution reverted: invalid token id"))
                }
            },
        ).await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_code_is_classified() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryPolicy::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::coded("-32005"))
                    } else {
                        Ok(7)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_classifier_markers() {
        let classifier = RetryClassifier::default();
        assert!(classifier.is_retryable(&TestError::transient("Request Timed Out")));
        assert!(classifier.is_retryable(&TestError::coded("503")));
        assert!(!classifier.is_retryable(&TestError::transient("not found")));

        let custom = RetryClassifier::none().with_message("Nonce Too Low");
        assert!(custom.is_retryable(&TestError::transient("error: nonce too low")));
        assert!(!custom.is_retryable(&TestError::transient("network down")));

        assert!(RetryClassifier::any().is_retryable(&TestError::transient("anything")));
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            ..RetryPolicy::test()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 10.0,
            ..RetryPolicy::test()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_policy_from_config() {
        let config = ResolverConfig {
            retry_max_retries: 5,
            retry_initial_delay_ms: 50,
            retry_max_delay_ms: 400,
            retry_backoff_multiplier: 3.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(150));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }
}
