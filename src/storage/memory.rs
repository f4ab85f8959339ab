// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use crate::record::CachedRecordSet;
use super::traits::{CacheBackend, StorageError};

/// Lightweight key-value cache backend.
///
/// Always available, also readable synchronously via [`get_now`](Self::get_now)
/// for first paint. Bounded by `max_entries`; the set with the oldest
/// `fetched_at` is evicted first.
pub struct InMemoryCacheBackend {
    data: DashMap<String, CachedRecordSet>,
    max_entries: usize,
}

impl InMemoryCacheBackend {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            data: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Synchronous read, no TTL applied.
    #[must_use]
    pub fn get_now(&self, owner_key: &str) -> Option<CachedRecordSet> {
        self.data.get(owner_key).map(|r| r.value().clone())
    }

    /// Synchronous write with the same replace / monotonic-stamp semantics as
    /// [`CacheBackend::put`].
    pub fn put_now(&self, set: &CachedRecordSet) {
        let mut stored = set.clone();
        if let Some(existing) = self.data.get(&set.owner_key) {
            stored.fetched_at = stored.fetched_at.max(existing.fetched_at);
        }
        self.data.insert(set.owner_key.clone(), stored);
        self.evict_overflow();
    }

    pub fn remove_now(&self, owner_key: &str) {
        self.data.remove(owner_key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    fn evict_overflow(&self) {
        while self.data.len() > self.max_entries {
            let oldest = self
                .data
                .iter()
                .min_by_key(|entry| entry.value().fetched_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.data.remove(&key);
                    crate::metrics::record_cache_eviction(self.name());
                }
                None => break,
            }
        }
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, owner_key: &str) -> Result<Option<CachedRecordSet>, StorageError> {
        Ok(self.get_now(owner_key))
    }

    async fn put(&self, set: &CachedRecordSet) -> Result<(), StorageError> {
        self.put_now(set);
        Ok(())
    }

    async fn delete(&self, owner_key: &str) -> Result<(), StorageError> {
        self.remove_now(owner_key);
        Ok(())
    }

    async fn count_owners(&self) -> Result<usize, StorageError> {
        Ok(self.data.len())
    }
}
