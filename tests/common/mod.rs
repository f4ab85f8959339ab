// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared fixtures for resolver tests: a scriptable ledger and fast policies.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hybrid_resolver::index::memory::InMemoryRecordIndex;
use hybrid_resolver::{
    AssetPayload, GroundTruth, HybridResolver, Record, RecordCache, RecordPayload, RemoteError,
    ResolverConfig, ResolverPolicies, RetryClassifier, RetryPolicy, TtlClass,
};

/// Ground truth backed by a map, with per-id failures and call counters.
#[derive(Default)]
pub struct MockLedger {
    records: Mutex<BTreeMap<String, Record>>,
    failing: Mutex<HashMap<String, RemoteError>>,
    enumerate_error: Mutex<Option<RemoteError>>,
    delay: Mutex<Duration>,
    pub get_calls: AtomicUsize,
    pub enumerate_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: Record) {
        self.records.lock().insert(record.record_id.clone(), record);
    }

    /// Move `record_id` to `new_owner`, as a transfer on the ledger would.
    pub fn transfer(&self, record_id: &str, new_owner: &str) {
        if let Some(record) = self.records.lock().get_mut(record_id) {
            record.owner_key = new_owner.to_string();
        }
    }

    pub fn fail_id(&self, record_id: &str, error: RemoteError) {
        self.failing.lock().insert(record_id.to_string(), error);
    }

    pub fn fail_enumeration(&self, error: Option<RemoteError>) {
        *self.enumerate_error.lock() = error;
    }

    /// Delay every call, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn gets(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.get_calls.store(0, Ordering::SeqCst);
        self.enumerate_calls.store(0, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GroundTruth for MockLedger {
    async fn get_record(&self, record_id: &str) -> Result<Option<Record>, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(e) = self.failing.lock().get(record_id) {
            return Err(e.clone());
        }
        Ok(self.records.lock().get(record_id).cloned())
    }

    async fn enumerate_by_owner(&self, owner_key: &str) -> Result<Vec<Record>, RemoteError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(e) = self.enumerate_error.lock().clone() {
            return Err(e);
        }
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.owner_key == owner_key)
            .cloned()
            .collect())
    }
}

pub fn asset(id: &str, owner: &str) -> Record {
    Record::new(
        id.to_string(),
        owner.to_string(),
        RecordPayload::Asset(AssetPayload {
            name: Some(format!("Asset {}", id)),
            asset_type: Some("real_estate".into()),
            ..Default::default()
        }),
    )
}

/// Small delays everywhere so tests run in milliseconds.
pub fn fast_config() -> ResolverConfig {
    ResolverConfig {
        retry_max_retries: 2,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        inter_batch_delay_ms: 1,
        refresh_concurrency: 2,
        ..Default::default()
    }
}

pub fn fast_policies() -> ResolverPolicies {
    let fast = RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        classifier: RetryClassifier::default(),
    };
    ResolverPolicies {
        ledger: fast.clone(),
        index: fast,
    }
}

pub struct Harness {
    pub resolver: HybridResolver,
    pub cache: Arc<RecordCache>,
    pub index: Arc<InMemoryRecordIndex>,
    pub ledger: Arc<MockLedger>,
}

pub fn harness() -> Harness {
    harness_with(fast_config())
}

/// Log to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with(config: ResolverConfig) -> Harness {
    init_tracing();
    let cache = Arc::new(RecordCache::in_memory(&config, TtlClass::Short));
    let index = Arc::new(InMemoryRecordIndex::new());
    let ledger = MockLedger::new();
    let resolver = HybridResolver::with_policies(
        config,
        cache.clone(),
        index.clone(),
        ledger.clone(),
        fast_policies(),
    );
    Harness {
        resolver,
        cache,
        index,
        ledger,
    }
}
