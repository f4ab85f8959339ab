// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent TTL cache of record sets, one per owner key.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ RecordCache                  │
//! │  get / put / invalidate      │
//! └──────┬───────────────┬───────┘
//!        │ healthy       │ always (mirror, get_sync)
//!        ▼               ▼
//! ┌─────────────┐  ┌──────────────┐
//! │ SQL durable │  │ in-memory KV │
//! └─────────────┘  └──────────────┘
//! ```
//!
//! The durable backend is preferred. The first time it errors it is marked
//! degraded and every later operation is served by the in-memory backend with
//! the same TTL semantics. Callers never see storage errors: a failing read is
//! a miss and a failing write is logged.
//!
//! Every write is mirrored into the in-memory backend so
//! [`get_sync`](RecordCache::get_sync) can serve a first paint without an
//! await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::record::{now_millis, CachedRecordSet, Record};
use crate::storage::memory::InMemoryCacheBackend;
use crate::storage::sql::SqlCacheBackend;
use crate::storage::traits::{CacheBackend, StorageError};
use crate::ttl::TtlClass;

/// Snapshot of backend state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHealth {
    /// A durable backend was configured and opened
    pub durable_configured: bool,
    /// The durable backend is still serving (not degraded)
    pub durable_healthy: bool,
}

pub struct RecordCache {
    durable: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<InMemoryCacheBackend>,
    durable_healthy: AtomicBool,
    class: TtlClass,
    ttl: Duration,
}

impl RecordCache {
    /// Build a cache over explicit backends.
    pub fn new(
        durable: Option<Arc<dyn CacheBackend>>,
        fallback: Arc<InMemoryCacheBackend>,
        class: TtlClass,
        ttl: Duration,
    ) -> Self {
        let durable_healthy = AtomicBool::new(durable.is_some());
        Self {
            durable,
            fallback,
            durable_healthy,
            class,
            ttl,
        }
    }

    /// In-memory only cache for `class`.
    #[must_use]
    pub fn in_memory(config: &ResolverConfig, class: TtlClass) -> Self {
        Self::new(
            None,
            Arc::new(InMemoryCacheBackend::new(config.max_cache_entries)),
            class,
            class.duration(config),
        )
    }

    /// Open the cache for `class`, preferring the durable SQL backend when
    /// `cache_sql_url` is set. Never fails: if the durable backend can't be
    /// opened the cache runs on the in-memory backend alone.
    ///
    /// Short and long caches keep owner keys in separate namespaces only if
    /// they are given separate databases.
    pub async fn open(config: &ResolverConfig, class: TtlClass) -> Self {
        let fallback = Arc::new(InMemoryCacheBackend::new(config.max_cache_entries));
        let ttl = class.duration(config);

        let durable: Option<Arc<dyn CacheBackend>> = match config.cache_sql_url.as_deref() {
            Some(url) => match SqlCacheBackend::new(url, config.max_cache_entries).await {
                Ok(store) => {
                    info!(class = %class, "Durable record cache opened");
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!(class = %class, error = %e, "Durable record cache unavailable, using in-memory backend");
                    crate::metrics::record_backend_fallover(class.label(), "open");
                    None
                }
            },
            None => None,
        };

        Self::new(durable, fallback, class, ttl)
    }

    #[must_use]
    pub fn class(&self) -> TtlClass {
        self.class
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn backend_health(&self) -> BackendHealth {
        BackendHealth {
            durable_configured: self.durable.is_some(),
            durable_healthy: self.active_durable().is_some(),
        }
    }

    fn active_durable(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.durable_healthy.load(Ordering::Acquire) {
            self.durable.as_ref()
        } else {
            None
        }
    }

    /// Sticky: once degraded, the durable backend stays out of rotation.
    fn mark_degraded(&self, operation: &str, error: &StorageError) {
        if self.durable_healthy.swap(false, Ordering::AcqRel) {
            warn!(
                class = %self.class,
                operation,
                error = %error,
                "Durable record cache failed, switching to in-memory backend"
            );
            crate::metrics::record_backend_fallover(self.class.label(), operation);
        }
    }

    fn is_fresh(&self, set: &CachedRecordSet) -> bool {
        !set.is_expired(self.ttl, now_millis())
    }

    /// Fresh record set for `owner_key`, or `None` when absent or expired.
    pub async fn get(&self, owner_key: &str) -> Option<CachedRecordSet> {
        if let Some(durable) = self.active_durable() {
            match durable.get(owner_key).await {
                Ok(Some(set)) if self.is_fresh(&set) => {
                    self.fallback.put_now(&set);
                    crate::metrics::record_cache_lookup(self.class.label(), "hit");
                    return Some(set);
                }
                Ok(Some(_)) => {
                    debug!(owner = %owner_key, class = %self.class, "Cached set expired");
                    crate::metrics::record_cache_lookup(self.class.label(), "expired");
                    self.invalidate(owner_key).await;
                    return None;
                }
                Ok(None) => {
                    crate::metrics::record_cache_lookup(self.class.label(), "miss");
                    return None;
                }
                Err(e) => self.mark_degraded("get", &e),
            }
        }

        self.get_sync(owner_key)
    }

    /// Synchronous read of the in-memory tier, same TTL rule as [`get`](Self::get).
    #[must_use]
    pub fn get_sync(&self, owner_key: &str) -> Option<CachedRecordSet> {
        match self.fallback.get_now(owner_key) {
            Some(set) if self.is_fresh(&set) => {
                crate::metrics::record_cache_lookup(self.class.label(), "hit");
                Some(set)
            }
            Some(_) => {
                self.fallback.remove_now(owner_key);
                crate::metrics::record_cache_lookup(self.class.label(), "expired");
                None
            }
            None => {
                crate::metrics::record_cache_lookup(self.class.label(), "miss");
                None
            }
        }
    }

    /// Replace every cached record for `owner_key`, stamped now.
    ///
    /// Records that fail validation for this owner are left out. Storage
    /// failures are logged, never returned.
    pub async fn put(&self, owner_key: &str, records: Vec<Record>) {
        let total = records.len();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|record| match record.validate_for_owner(owner_key) {
                Ok(()) => true,
                Err(e) => {
                    warn!(owner = %owner_key, error = %e, "Refusing to cache invalid record");
                    false
                }
            })
            .collect();
        if records.len() < total {
            crate::metrics::record_invalid_records(total - records.len());
        }

        let set = CachedRecordSet::new(owner_key.to_string(), records);
        self.fallback.put_now(&set);

        if let Some(durable) = self.active_durable() {
            if let Err(e) = durable.put(&set).await {
                self.mark_degraded("put", &e);
            }
        }

        debug!(owner = %owner_key, class = %self.class, count = set.records.len(), "Cached record set");
    }

    /// Remove `owner_key` from every backend immediately.
    pub async fn invalidate(&self, owner_key: &str) {
        self.fallback.remove_now(owner_key);
        if let Some(durable) = self.active_durable() {
            if let Err(e) = durable.delete(owner_key).await {
                self.mark_degraded("delete", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PoolPayload, RecordPayload};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Durable backend that can be switched to fail every call.
    struct FlakyBackend {
        inner: InMemoryCacheBackend,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: InMemoryCacheBackend::new(100),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(StorageError::Unavailable("disk detached".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, owner_key: &str) -> Result<Option<CachedRecordSet>, StorageError> {
            self.check()?;
            self.inner.get(owner_key).await
        }

        async fn put(&self, set: &CachedRecordSet) -> Result<(), StorageError> {
            self.check()?;
            self.inner.put(set).await
        }

        async fn delete(&self, owner_key: &str) -> Result<(), StorageError> {
            self.check()?;
            self.inner.delete(owner_key).await
        }

        async fn count_owners(&self) -> Result<usize, StorageError> {
            self.check()?;
            self.inner.count_owners().await
        }
    }

    fn pool(id: &str, owner: &str) -> Record {
        Record::new(
            id.into(),
            owner.into(),
            RecordPayload::Pool(PoolPayload {
                name: Some(format!("Pool {}", id)),
                ..Default::default()
            }),
        )
    }

    fn cache_over(durable: Arc<FlakyBackend>, ttl: Duration) -> RecordCache {
        let durable: Arc<dyn CacheBackend> = durable;
        RecordCache::new(
            Some(durable),
            Arc::new(InMemoryCacheBackend::new(100)),
            TtlClass::Short,
            ttl,
        )
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_records() {
        let cache = RecordCache::in_memory(&ResolverConfig::default(), TtlClass::Short);
        let records = vec![pool("p1", "owner"), pool("p2", "owner")];

        cache.put("owner", records.clone()).await;

        let set = cache.get("owner").await.unwrap();
        assert_eq!(set.records, records);
        assert_eq!(set.owner_key, "owner");
    }

    #[tokio::test]
    async fn test_expired_set_is_a_miss_and_removed() {
        let durable = Arc::new(FlakyBackend::new());
        let cache = cache_over(durable.clone(), Duration::from_secs(60));

        let mut stale = CachedRecordSet::new("owner".into(), vec![pool("p1", "owner")]);
        stale.fetched_at = now_millis() - 61_000;
        durable.inner.put_now(&stale);

        assert!(cache.get("owner").await.is_none());
        assert!(durable.inner.get_now("owner").is_none());
    }

    #[tokio::test]
    async fn test_get_sync_applies_ttl() {
        let fallback = Arc::new(InMemoryCacheBackend::new(10));
        let cache = RecordCache::new(None, fallback.clone(), TtlClass::Short, Duration::from_secs(60));

        cache.put("fresh", vec![pool("p1", "fresh")]).await;
        assert!(cache.get_sync("fresh").is_some());

        let mut stale = CachedRecordSet::new("stale".into(), vec![]);
        stale.fetched_at = now_millis() - 120_000;
        fallback.put_now(&stale);
        assert!(cache.get_sync("stale").is_none());
        assert!(fallback.get_now("stale").is_none());
    }

    #[tokio::test]
    async fn test_put_mirrors_for_first_paint() {
        let durable = Arc::new(FlakyBackend::new());
        let cache = cache_over(durable.clone(), Duration::from_secs(60));

        cache.put("owner", vec![pool("p1", "owner")]).await;

        assert!(durable.inner.get_now("owner").is_some());
        assert_eq!(cache.get_sync("owner").unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_clears_every_backend() {
        let durable = Arc::new(FlakyBackend::new());
        let cache = cache_over(durable.clone(), Duration::from_secs(60));

        cache.put("owner", vec![pool("p1", "owner")]).await;
        cache.invalidate("owner").await;

        assert!(cache.get("owner").await.is_none());
        assert!(cache.get_sync("owner").is_none());
        assert!(durable.inner.get_now("owner").is_none());
    }

    #[tokio::test]
    async fn test_durable_failure_falls_over_to_memory() {
        let durable = Arc::new(FlakyBackend::new());
        let cache = cache_over(durable.clone(), Duration::from_secs(60));

        cache.put("owner", vec![pool("p1", "owner")]).await;
        durable.failing.store(true, Ordering::SeqCst);

        // Served from the mirror, no error surfaces
        let set = cache.get("owner").await.unwrap();
        assert_eq!(set.records.len(), 1);
        assert!(!cache.backend_health().durable_healthy);

        // Writes keep working on the in-memory backend
        cache.put("other", vec![pool("p2", "other")]).await;
        assert!(cache.get("other").await.is_some());
    }

    #[tokio::test]
    async fn test_degraded_backend_is_not_retried() {
        let durable = Arc::new(FlakyBackend::new());
        durable.failing.store(true, Ordering::SeqCst);
        let cache = cache_over(durable.clone(), Duration::from_secs(60));

        cache.put("owner", vec![]).await;
        let calls_after_failure = durable.calls.load(Ordering::SeqCst);

        cache.get("owner").await;
        cache.put("owner", vec![]).await;
        cache.invalidate("owner").await;

        assert_eq!(durable.calls.load(Ordering::SeqCst), calls_after_failure);
        assert_eq!(
            cache.backend_health(),
            BackendHealth { durable_configured: true, durable_healthy: false }
        );
    }

    #[tokio::test]
    async fn test_records_for_other_owners_are_not_cached() {
        let cache = RecordCache::in_memory(&ResolverConfig::default(), TtlClass::Short);

        cache
            .put("owner", vec![pool("p1", "owner"), pool("p2", "someone-else")])
            .await;

        let set = cache.get("owner").await.unwrap();
        assert_eq!(set.records.len(), 1);
        assert_eq!(set.records[0].record_id, "p1");
    }

    #[tokio::test]
    async fn test_empty_set_is_a_hit() {
        let cache = RecordCache::in_memory(&ResolverConfig::default(), TtlClass::Short);
        cache.put("owner", vec![]).await;

        let set = cache.get("owner").await.unwrap();
        assert!(set.records.is_empty());
    }

    #[tokio::test]
    async fn test_open_without_url_is_memory_only() {
        let cache = RecordCache::open(&ResolverConfig::default(), TtlClass::Long).await;
        assert_eq!(
            cache.backend_health(),
            BackendHealth { durable_configured: false, durable_healthy: false }
        );
        assert_eq!(cache.ttl(), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_open_with_sqlite_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = ResolverConfig {
            cache_sql_url: Some(format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("records.db").display()
            )),
            ..Default::default()
        };

        {
            let cache = RecordCache::open(&config, TtlClass::Short).await;
            assert!(cache.backend_health().durable_healthy);
            cache.put("owner", vec![pool("p1", "owner")]).await;
        }

        let reopened = RecordCache::open(&config, TtlClass::Short).await;
        assert!(reopened.get_sync("owner").is_none());
        let set = reopened.get("owner").await.unwrap();
        assert_eq!(set.records[0].record_id, "p1");
        // Durable hit warms the in-memory tier
        assert!(reopened.get_sync("owner").is_some());
    }
}
