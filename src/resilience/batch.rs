// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batched execution of independent remote calls.
//!
//! Items are split into fixed-size groups. Each group runs concurrently, each
//! call under its own [`retry`] loop, and groups run one after another with a
//! short pause in between so a rate-limited endpoint is never flooded.
//!
//! Two flavours:
//! - [`settle_batched`] - one `Result` per input ("all settled")
//! - [`retry_batched`] - best effort, failures are logged and dropped

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::retry::{retry, RetryPolicy, Retryable};
use crate::config::ResolverConfig;

/// Batch sizing for [`settle_batched`] / [`retry_batched`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Calls per group (min 1)
    pub size: usize,
    /// Pause between groups
    pub inter_batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            size: 5,
            inter_batch_delay: Duration::from_millis(100),
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            size: config.batch_size.max(1),
            inter_batch_delay: Duration::from_millis(config.inter_batch_delay_ms),
        }
    }

    /// A single unbounded group with no pauses.
    #[must_use]
    pub fn unbounded(len: usize) -> Self {
        Self {
            size: len.max(1),
            inter_batch_delay: Duration::ZERO,
        }
    }
}

/// Run `operation` for every item, in batches, and report every outcome.
///
/// Never fails as a whole: each item gets its own `Result`, paired with the
/// input it came from. Output order follows input order.
pub async fn settle_batched<I, F, Fut, T, E>(
    operation_name: &str,
    items: Vec<I>,
    batch: &BatchOptions,
    policy: &RetryPolicy,
    operation: F,
) -> Vec<(I, Result<T, E>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let size = batch.size.max(1);
    let total = items.len();
    let mut settled = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();
    let mut batch_no = 0usize;

    while remaining.peek().is_some() {
        if batch_no > 0 && !batch.inter_batch_delay.is_zero() {
            sleep(batch.inter_batch_delay).await;
        }

        let group: Vec<I> = remaining.by_ref().take(size).collect();
        debug!(
            operation = operation_name,
            batch = batch_no,
            size = group.len(),
            total,
            "Running batch"
        );

        let calls = group.iter().cloned().map(|item| {
            let operation = &operation;
            async move { retry(operation_name, policy, || operation(item.clone())).await }
        });
        let outcomes = join_all(calls).await;

        settled.extend(group.into_iter().zip(outcomes));
        batch_no += 1;
    }

    settled
}

/// Best-effort batched execution: returns only the successful values.
///
/// A failing item is logged and excluded; it never aborts its siblings.
pub async fn retry_batched<I, F, Fut, T, E>(
    operation_name: &str,
    items: Vec<I>,
    batch: &BatchOptions,
    policy: &RetryPolicy,
    operation: F,
) -> Vec<T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let settled = settle_batched(operation_name, items, batch, policy, operation).await;
    let mut values = Vec::with_capacity(settled.len());
    for (position, (_, outcome)) in settled.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(e) => {
                warn!(operation = operation_name, position, error = %e, "Batch item failed, skipping");
                crate::metrics::record_batch_item_failure(operation_name);
            }
        }
    }
    values
}

/// "All settled" over every item at once, without batching.
pub async fn settle_all<I, F, Fut, T, E>(
    operation_name: &str,
    items: Vec<I>,
    policy: &RetryPolicy,
    operation: F,
) -> Vec<(I, Result<T, E>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let batch = BatchOptions::unbounded(items.len());
    settle_batched(operation_name, items, &batch, policy, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Failed(String);

    impl std::fmt::Display for Failed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Retryable for Failed {}

    fn fast_batches(size: usize) -> BatchOptions {
        BatchOptions {
            size,
            inter_batch_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_settle_reports_every_item() {
        let items: Vec<u32> = (0..7).collect();
        let settled = settle_batched(
            "double",
            items,
            &fast_batches(3),
            &RetryPolicy::test(),
            |n| async move {
                if n == 4 {
                    Err(Failed(format!("item {} invalid", n)))
                } else {
                    Ok(n * 2)
                }
            },
        )
        .await;

        assert_eq!(settled.len(), 7);
        assert_eq!(settled[2], (2, Ok(4)));
        assert_eq!(settled[4].0, 4);
        assert!(settled[4].1.is_err());
    }

    #[tokio::test]
    async fn test_retry_batched_drops_failures_only() {
        let values = retry_batched(
            "double",
            vec![1u32, 2, 3, 4, 5],
            &fast_batches(2),
            &RetryPolicy::test(),
            |n| async move {
                if n % 2 == 0 {
                    Err(Failed("rejected".into()))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(values, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_batch_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let settled = settle_batched(
            "bounded",
            (0..10).collect::<Vec<u32>>(),
            &fast_batches(3),
            &RetryPolicy::test(),
            |n| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Failed>(n)
                }
            },
        )
        .await;

        assert_eq!(settled.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_transient_item_is_retried_within_batch() {
        let calls = Arc::new(AtomicUsize::new(0));

        let values = retry_batched(
            "flaky",
            vec!["a", "b"],
            &fast_batches(5),
            &RetryPolicy::test(),
            |id| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if id == "b" && n < 2 {
                        Err(Failed("network error".into()))
                    } else {
                        Ok(id)
                    }
                }
            },
        )
        .await;

        assert_eq!(values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_settle_all_empty_input() {
        let settled = settle_all(
            "noop",
            Vec::<u8>::new(),
            &RetryPolicy::test(),
            |n| async move { Ok::<_, Failed>(n) },
        )
        .await;
        assert!(settled.is_empty());
    }
}
