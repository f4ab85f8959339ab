// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deadline-bounded confirmation of submitted mutations.
//!
//! Two phases:
//!
//! 1. Race the remote system's native wait-for-inclusion against `timeout`.
//! 2. If the native wait stalls (or fails transiently), poll
//!    [`ReceiptSource::get_receipt`] every `poll_interval` until a receipt
//!    appears or a second deadline of the same length passes.
//!
//! The total wait is therefore bounded by roughly twice `timeout`. A native
//! wait abandoned by the timer is dropped; whatever it started remotely is not
//! cancelled.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{LatencyClass, ResolverConfig};
use crate::ledger::{Receipt, ReceiptOrigin, ReceiptSource, RemoteError, TransactionHandle};
use crate::resilience::retry::RetryClassifier;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("transaction {transaction_id} not confirmed after {waited:?}")]
    Timeout {
        transaction_id: String,
        waited: Duration,
    },
    #[error("confirmation failed: {0}")]
    Remote(#[from] RemoteError),
}

pub struct ConfirmationWaiter {
    source: Arc<dyn ReceiptSource>,
    poll_interval: Duration,
    standard_timeout: Duration,
    congested_timeout: Duration,
    classifier: RetryClassifier,
}

impl ConfirmationWaiter {
    pub fn new(source: Arc<dyn ReceiptSource>, config: &ResolverConfig) -> Self {
        Self {
            source,
            poll_interval: config.poll_interval(),
            standard_timeout: config.confirmation_timeout(LatencyClass::Standard),
            congested_timeout: config.confirmation_timeout(LatencyClass::Congested),
            classifier: RetryClassifier::default(),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Decides which native-wait failures fall back to polling.
    #[must_use]
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Wait using the configured timeout for `latency`.
    pub async fn wait_default(
        &self,
        handle: &TransactionHandle,
        latency: LatencyClass,
    ) -> Result<Receipt, WaitError> {
        let limit = match latency {
            LatencyClass::Standard => self.standard_timeout,
            LatencyClass::Congested => self.congested_timeout,
        };
        self.wait(handle, limit).await
    }

    /// Wait until `handle` is included, or fail with [`WaitError::Timeout`].
    ///
    /// A receipt is returned whether or not the mutation succeeded once
    /// included; check [`Receipt::success`].
    #[tracing::instrument(skip(self, handle), fields(tx = %handle.id, via))]
    pub async fn wait(&self, handle: &TransactionHandle, limit: Duration) -> Result<Receipt, WaitError> {
        let started = Instant::now();

        match timeout(limit, self.source.wait_for_inclusion(handle)).await {
            Ok(Ok(receipt)) => {
                tracing::Span::current().record("via", "native");
                crate::metrics::record_confirmation("native", started.elapsed());
                return Ok(Receipt {
                    observed_via: ReceiptOrigin::Native,
                    ..receipt
                });
            }
            Ok(Err(e)) if !self.classifier.is_retryable(&e) => {
                warn!(tx = %handle.id, error = %e, "Native confirmation failed permanently");
                crate::metrics::record_confirmation("error", started.elapsed());
                return Err(WaitError::Remote(e));
            }
            Ok(Err(e)) => {
                warn!(tx = %handle.id, error = %e, "Native confirmation failed, falling back to polling");
            }
            Err(_) => {
                info!(tx = %handle.id, waited = ?limit, "Native confirmation stalled, falling back to polling");
            }
        }

        let deadline = Instant::now() + limit;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match timeout_at(deadline, self.source.get_receipt(&handle.id)).await {
                Ok(Ok(Some(receipt))) => {
                    debug!(tx = %handle.id, polls, "Receipt found by polling");
                    tracing::Span::current().record("via", "poll");
                    crate::metrics::record_confirmation("poll", started.elapsed());
                    return Ok(Receipt {
                        observed_via: ReceiptOrigin::Poll,
                        ..receipt
                    });
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(tx = %handle.id, polls, error = %e, "Receipt query failed, still polling");
                }
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        let waited = started.elapsed();
        warn!(tx = %handle.id, ?waited, polls, "Confirmation timed out");
        crate::metrics::record_confirmation("timeout", waited);
        Err(WaitError::Timeout {
            transaction_id: handle.id.clone(),
            waited,
        })
    }
}
