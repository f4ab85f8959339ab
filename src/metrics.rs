// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the resolver.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `hybrid_resolver_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, index, fetch, enumeration
//! - `source`: cache, hybrid, blockchain
//! - `class`: short, long (cache TTL class)
//! - `outcome`: operation-specific result

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a retry-executor decision (`retried`, `exhausted`, `permanent`)
pub fn record_retry(operation: &str, outcome: &str) {
    counter!(
        "hybrid_resolver_retries_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an item dropped from a best-effort batch
pub fn record_batch_item_failure(operation: &str) {
    counter!(
        "hybrid_resolver_batch_item_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a cache read (`hit`, `miss`, `expired`)
pub fn record_cache_lookup(class: &str, outcome: &str) {
    counter!(
        "hybrid_resolver_cache_lookups_total",
        "class" => class.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an owner set evicted for capacity
pub fn record_cache_eviction(backend: &str) {
    counter!(
        "hybrid_resolver_cache_evictions_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record the durable cache backend being taken out of rotation
pub fn record_backend_fallover(class: &str, operation: &str) {
    counter!(
        "hybrid_resolver_cache_fallovers_total",
        "class" => class.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record records refused at the cache boundary
pub fn record_invalid_records(count: usize) {
    counter!("hybrid_resolver_invalid_records_total").increment(count as u64);
}

/// Record how a resolution finished
pub fn record_resolve(source: &str, record_count: usize, duration: Duration) {
    counter!(
        "hybrid_resolver_resolutions_total",
        "source" => source.to_string()
    )
    .increment(1);
    histogram!(
        "hybrid_resolver_resolve_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
    histogram!("hybrid_resolver_resolved_records").record(record_count as f64);
}

/// Record a tier outcome (`hit`, `empty`, `error`, `skipped`)
pub fn record_tier(tier: &str, outcome: &str) {
    counter!(
        "hybrid_resolver_tier_outcomes_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record placeholders substituted for ids that failed to resolve
pub fn record_placeholders(count: usize) {
    counter!("hybrid_resolver_placeholders_total").increment(count as u64);
}

/// Record index entries dropped because ground truth disagrees on the owner
pub fn record_stale_index_entries(count: usize) {
    counter!("hybrid_resolver_stale_index_entries_total").increment(count as u64);
}

/// Record a background job outcome (`completed`, `failed`, `skipped`, `dropped`)
pub fn record_background_job(kind: &str, outcome: &str) {
    counter!(
        "hybrid_resolver_background_jobs_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set background jobs queued or running
pub fn set_background_jobs_pending(count: usize) {
    gauge!("hybrid_resolver_background_jobs_pending").set(count as f64);
}

/// Record a confirmation wait (`native`, `poll`, `timeout`, `error`)
pub fn record_confirmation(outcome: &str, duration: Duration) {
    counter!(
        "hybrid_resolver_confirmations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "hybrid_resolver_confirmation_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a single tier's latency
pub fn record_tier_latency(tier: &str, duration: Duration) {
    histogram!(
        "hybrid_resolver_tier_seconds",
        "tier" => tier.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Timer guard that records a tier's latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_tier_latency(self.tier, self.start.elapsed());
    }
}
