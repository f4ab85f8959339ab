// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the resolver.
//!
//! # Example
//!
//! ```
//! use hybrid_resolver::ResolverConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ResolverConfig::default();
//! assert_eq!(config.short_ttl_secs, 300);
//! assert_eq!(config.batch_size, 5);
//!
//! // Durable cache + tighter retries
//! let config = ResolverConfig {
//!     cache_sql_url: Some("sqlite://records-cache.db?mode=rwc".into()),
//!     retry_max_retries: 2,
//!     retry_initial_delay_ms: 250,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Remote latency class, used to pick the confirmation timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    /// Normal endpoint latency
    #[default]
    Standard,
    /// Slow or congested endpoints
    Congested,
}

/// Configuration for the resolver, cache and confirmation waiter.
///
/// All fields have defaults. Without `cache_sql_url` the cache runs on the
/// in-memory backend only.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Durable cache connection string (e.g. "sqlite://cache.db?mode=rwc")
    #[serde(default)]
    pub cache_sql_url: Option<String>,

    /// TTL for mutable ledger-backed records (default: 5 minutes)
    #[serde(default = "default_short_ttl_secs")]
    pub short_ttl_secs: u64,
    /// TTL for immutable metadata (default: 24 hours)
    #[serde(default = "default_long_ttl_secs")]
    pub long_ttl_secs: u64,
    /// Max owner sets kept per cache backend
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,

    /// Retry policy defaults for remote calls
    #[serde(default = "default_retry_max_retries")]
    pub retry_max_retries: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Confirmation wait timeouts per latency class
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_congested_confirmation_timeout_secs")]
    pub congested_confirmation_timeout_secs: u64,
    /// Receipt poll interval once the native wait stalls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Ground-truth fetch batching
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,

    /// Background work queue
    #[serde(default = "default_refresh_queue_capacity")]
    pub refresh_queue_capacity: usize,
    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_short_ttl_secs() -> u64 { 5 * 60 }
fn default_long_ttl_secs() -> u64 { 24 * 60 * 60 }
fn default_max_cache_entries() -> usize { 1000 }
fn default_retry_max_retries() -> usize { 3 }
fn default_retry_initial_delay_ms() -> u64 { 1000 }
fn default_retry_backoff_multiplier() -> f64 { 2.0 }
fn default_retry_max_delay_ms() -> u64 { 10_000 }
fn default_confirmation_timeout_secs() -> u64 { 120 }
fn default_congested_confirmation_timeout_secs() -> u64 { 180 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_batch_size() -> usize { 5 }
fn default_inter_batch_delay_ms() -> u64 { 100 }
fn default_refresh_queue_capacity() -> usize { 64 }
fn default_refresh_concurrency() -> usize { 2 }
fn default_event_channel_capacity() -> usize { 256 }

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_sql_url: None,
            short_ttl_secs: default_short_ttl_secs(),
            long_ttl_secs: default_long_ttl_secs(),
            max_cache_entries: default_max_cache_entries(),
            retry_max_retries: default_retry_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            congested_confirmation_timeout_secs: default_congested_confirmation_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            refresh_queue_capacity: default_refresh_queue_capacity(),
            refresh_concurrency: default_refresh_concurrency(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ResolverConfig {
    /// Confirmation timeout for the given latency class.
    #[must_use]
    pub fn confirmation_timeout(&self, class: LatencyClass) -> Duration {
        match class {
            LatencyClass::Standard => Duration::from_secs(self.confirmation_timeout_secs),
            LatencyClass::Congested => {
                Duration::from_secs(self.congested_confirmation_timeout_secs)
            }
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
