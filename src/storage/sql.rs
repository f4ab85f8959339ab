// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable SQL cache backend.
//!
//! One row per owner plus one row per cached record:
//! ```sql
//! CREATE TABLE cache_owners (
//!   owner_key VARCHAR(255) PRIMARY KEY,
//!   fetched_at BIGINT NOT NULL        -- never decreases
//! )
//! CREATE TABLE cached_records (
//!   owner_key VARCHAR(255) NOT NULL,
//!   position INT NOT NULL,            -- preserves result order
//!   record_id VARCHAR(255) NOT NULL,
//!   fetched_at BIGINT NOT NULL,
//!   payload LONGTEXT NOT NULL,        -- full Record as JSON
//!   PRIMARY KEY (owner_key, position)
//! )
//! ```
//!
//! The owner row is what makes an empty set distinguishable from "never
//! cached". A put clears the owner's records and inserts the new ones inside
//! one transaction, so readers never see a half-replaced set.
//!
//! ## sqlx Any Driver Quirks
//!
//! Record payloads are TEXT rather than a native JSON column. The `Any` driver
//! hands MySQL LONGTEXT back as bytes, so text columns are read as `String`
//! first and as `Vec<u8>` second.

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, any::AnyRow, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

use super::traits::{CacheBackend, StorageError};
use crate::record::{CachedRecordSet, Record};
use crate::resilience::retry::{retry, RetryPolicy};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Read a text column as String (SQLite) or bytes (MySQL LONGTEXT).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub struct SqlCacheBackend {
    pool: AnyPool,
    is_sqlite: bool,
    max_entries: usize,
}

impl SqlCacheBackend {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the schema if needed.
    pub async fn new(connection_string: &str, max_entries: usize) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_cache_connect", &RetryPolicy::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 4 } else { 10 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            is_sqlite,
            max_entries: max_entries.max(1),
        };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS cache_owners (
                    owner_key TEXT PRIMARY KEY,
                    fetched_at INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS cached_records (
                    owner_key TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    record_id TEXT NOT NULL,
                    fetched_at INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (owner_key, position)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_cache_owners_fetched_at ON cache_owners (fetched_at)",
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS cache_owners (
                    owner_key VARCHAR(255) PRIMARY KEY,
                    fetched_at BIGINT NOT NULL,
                    INDEX idx_cache_owners_fetched_at (fetched_at)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS cached_records (
                    owner_key VARCHAR(255) NOT NULL,
                    position INT NOT NULL,
                    record_id VARCHAR(255) NOT NULL,
                    fetched_at BIGINT NOT NULL,
                    payload LONGTEXT NOT NULL,
                    PRIMARY KEY (owner_key, position)
                )
                "#,
            ]
        };

        for sql in statements.iter().copied() {
            retry("sql_cache_init_schema", &RetryPolicy::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(backend_err)
            })
            .await?;
        }

        Ok(())
    }

    fn upsert_owner_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO cache_owners (owner_key, fetched_at) VALUES (?, ?) \
             ON CONFLICT(owner_key) DO UPDATE SET \
                fetched_at = MAX(cache_owners.fetched_at, excluded.fetched_at)"
        } else {
            "INSERT INTO cache_owners (owner_key, fetched_at) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE \
                fetched_at = GREATEST(fetched_at, VALUES(fetched_at))"
        }
    }

    /// Drop the oldest owner sets beyond `max_entries`.
    async fn evict_overflow(&self) -> Result<usize, StorageError> {
        let count = self.count_owners().await?;
        if count <= self.max_entries {
            return Ok(0);
        }
        let excess = count - self.max_entries;

        let rows = sqlx::query("SELECT owner_key FROM cache_owners ORDER BY fetched_at ASC LIMIT ?")
            .bind(excess as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        let mut evicted = 0;
        for row in rows {
            if let Some(owner_key) = text_column(&row, "owner_key") {
                self.delete(&owner_key).await?;
                crate::metrics::record_cache_eviction(self.name());
                evicted += 1;
            }
        }

        debug!(evicted, max_entries = self.max_entries, "Evicted oldest cached owner sets");
        Ok(evicted)
    }
}

#[async_trait]
impl CacheBackend for SqlCacheBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn get(&self, owner_key: &str) -> Result<Option<CachedRecordSet>, StorageError> {
        // The Any driver narrows SQLite integers to 32 bits; read millis as text
        let select_owner = if self.is_sqlite {
            "SELECT CAST(fetched_at AS TEXT) AS fetched_at FROM cache_owners WHERE owner_key = ?"
        } else {
            "SELECT CAST(fetched_at AS CHAR) AS fetched_at FROM cache_owners WHERE owner_key = ?"
        };
        let owner_row = sqlx::query(select_owner)
            .bind(owner_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        let Some(owner_row) = owner_row else {
            return Ok(None);
        };
        let fetched_at = text_column(&owner_row, "fetched_at")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .ok_or_else(|| StorageError::Invalid {
                owner_key: owner_key.to_string(),
                reason: "owner row has no readable fetched_at".to_string(),
            })?;

        let rows = sqlx::query(
            "SELECT payload FROM cached_records WHERE owner_key = ? ORDER BY position ASC",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload = text_column(&row, "payload").ok_or_else(|| StorageError::Invalid {
                owner_key: owner_key.to_string(),
                reason: "record row has no payload".to_string(),
            })?;
            let record: Record =
                serde_json::from_str(&payload).map_err(|e| StorageError::Invalid {
                    owner_key: owner_key.to_string(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }

        Ok(Some(CachedRecordSet {
            owner_key: owner_key.to_string(),
            records,
            fetched_at,
        }))
    }

    async fn put(&self, set: &CachedRecordSet) -> Result<(), StorageError> {
        // Serialize up front so a bad record never leaves a half-open transaction
        let mut prepared = Vec::with_capacity(set.records.len());
        for record in &set.records {
            let payload = serde_json::to_string(record).map_err(|e| StorageError::Invalid {
                owner_key: set.owner_key.clone(),
                reason: e.to_string(),
            })?;
            prepared.push((record.record_id.clone(), record.fetched_at, payload));
        }

        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        sqlx::query(self.upsert_owner_sql())
            .bind(&set.owner_key)
            .bind(set.fetched_at)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        sqlx::query("DELETE FROM cached_records WHERE owner_key = ?")
            .bind(&set.owner_key)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        for (position, (record_id, fetched_at, payload)) in prepared.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cached_records (owner_key, position, record_id, fetched_at, payload) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&set.owner_key)
            .bind(position as i64)
            .bind(record_id)
            .bind(*fetched_at)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }

        tx.commit().await.map_err(backend_err)?;

        self.evict_overflow().await?;
        Ok(())
    }

    async fn delete(&self, owner_key: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        sqlx::query("DELETE FROM cached_records WHERE owner_key = ?")
            .bind(owner_key)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM cache_owners WHERE owner_key = ?")
            .bind(owner_key)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)
    }

    async fn count_owners(&self) -> Result<usize, StorageError> {
        let result = sqlx::query("SELECT COUNT(*) as cnt FROM cache_owners")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;

        let count: i64 = result.try_get("cnt").map_err(backend_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AssetPayload, RecordPayload};
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir, max_entries: usize) -> SqlCacheBackend {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cache.db").display());
        SqlCacheBackend::new(&url, max_entries).await.unwrap()
    }

    fn asset(id: &str, owner: &str) -> Record {
        Record::new(
            id.to_string(),
            owner.to_string(),
            RecordPayload::Asset(AssetPayload {
                name: Some(format!("Asset {}", id)),
                ..Default::default()
            }),
        )
    }

    fn set_of(owner: &str, ids: &[&str]) -> CachedRecordSet {
        CachedRecordSet::new(
            owner.to_string(),
            ids.iter().map(|id| asset(id, owner)).collect(),
        )
    }

    #[tokio::test]
    async fn test_put_then_get_preserves_order_and_payload() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        let set = set_of("0xabc", &["c", "a", "b"]);
        store.put(&set).await.unwrap();

        let loaded = store.get("0xabc").await.unwrap().unwrap();
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn test_wall_clock_stamp_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut set = set_of("0xabc", &["a"]);
        set.fetched_at = 1_792_441_118_763;
        {
            let store = open_store(&dir, 100).await;
            store.put(&set).await.unwrap();
        }

        let reopened = open_store(&dir, 100).await;
        let loaded = reopened.get("0xabc").await.unwrap().unwrap();
        assert_eq!(loaded.fetched_at, 1_792_441_118_763);
        assert!(!loaded.is_expired(Duration::from_secs(300), 1_792_441_118_763 + 1_000));
    }

    #[tokio::test]
    async fn test_missing_owner_is_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_set_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        store.put(&set_of("empty", &[])).await.unwrap();

        let loaded = store.get("empty").await.unwrap().unwrap();
        assert!(loaded.records.is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_previous_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        store.put(&set_of("owner", &["a", "b", "c"])).await.unwrap();
        store.put(&set_of("owner", &["z"])).await.unwrap();

        let loaded = store.get("owner").await.unwrap().unwrap();
        let ids: Vec<_> = loaded.records.iter().map(|r| r.record_id.clone()).collect();
        assert_eq!(ids, vec!["z".to_string()]);
    }

    #[tokio::test]
    async fn test_fetched_at_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        let mut newer = set_of("owner", &["a"]);
        newer.fetched_at = 5_000;
        let mut older = set_of("owner", &["b"]);
        older.fetched_at = 4_000;

        store.put(&newer).await.unwrap();
        store.put(&older).await.unwrap();

        let loaded = store.get("owner").await.unwrap().unwrap();
        assert_eq!(loaded.fetched_at, 5_000);
        assert_eq!(loaded.records[0].record_id, "b");
    }

    #[tokio::test]
    async fn test_delete_removes_owner_and_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        store.put(&set_of("owner", &["a", "b"])).await.unwrap();
        store.delete("owner").await.unwrap();

        assert!(store.get("owner").await.unwrap().is_none());
        assert_eq!(store.count_owners().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evicts_oldest_owner_sets() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 2).await;

        for (i, owner) in ["o1", "o2", "o3"].iter().enumerate() {
            let mut set = set_of(owner, &["x"]);
            set.fetched_at = 1_000 + i as i64;
            store.put(&set).await.unwrap();
        }

        assert_eq!(store.count_owners().await.unwrap(), 2);
        assert!(store.get("o1").await.unwrap().is_none());
        assert!(store.get("o2").await.unwrap().is_some());
        assert!(store.get("o3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir, 100).await;
            store.put(&set_of("owner", &["a"])).await.unwrap();
        }

        let reopened = open_store(&dir, 100).await;
        let loaded = reopened.get("owner").await.unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_invalid_not_panic() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 100).await;

        store.put(&set_of("owner", &["a"])).await.unwrap();
        sqlx::query("UPDATE cached_records SET payload = ? WHERE owner_key = ?")
            .bind("{not json")
            .bind("owner")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get("owner").await.unwrap_err();
        assert!(matches!(err, StorageError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_bad_url_fails() {
        let result = SqlCacheBackend::new("sqlite:///nonexistent-dir/deeper/cache.db", 10).await;
        assert!(result.is_err());
    }
}
