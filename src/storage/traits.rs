// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use crate::record::CachedRecordSet;
use crate::resilience::retry::Retryable;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Invalid cached data for '{owner_key}': {reason}")]
    Invalid {
        owner_key: String,
        reason: String,
    },
}

impl Retryable for StorageError {
    fn is_permanent(&self) -> bool {
        matches!(self, StorageError::Invalid { .. })
    }
}

/// Key → record-set store.
///
/// Two implementations satisfy identical semantics: the durable
/// [`SqlCacheBackend`](super::sql::SqlCacheBackend) and the lightweight
/// [`InMemoryCacheBackend`](super::memory::InMemoryCacheBackend). Backends
/// store whatever they are given; TTL is applied by the
/// [`RecordCache`](crate::RecordCache) on read.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name for logs and metric labels.
    fn name(&self) -> &'static str;

    async fn get(&self, owner_key: &str) -> Result<Option<CachedRecordSet>, StorageError>;

    /// Replace every record stored for `set.owner_key`.
    ///
    /// Old entries are cleared before the new ones are inserted, atomically.
    /// The stored `fetched_at` never moves backwards: if the existing stamp is
    /// newer than `set.fetched_at`, the existing stamp is kept.
    async fn put(&self, set: &CachedRecordSet) -> Result<(), StorageError>;

    async fn delete(&self, owner_key: &str) -> Result<(), StorageError>;

    /// Number of owner sets currently stored.
    async fn count_owners(&self) -> Result<usize, StorageError>;
}
