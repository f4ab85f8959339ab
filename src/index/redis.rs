// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed record index.
//!
//! One hash per owner, one field per record:
//! ```text
//! HSET {prefix}owner-index:{owner_key} {record_id} '{"kind":"asset","name":"..."}'
//! HGETALL {prefix}owner-index:{owner_key}
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use super::RecordIndex;
use crate::ledger::RemoteError;
use crate::record::IndexEntry;
use crate::resilience::retry::{retry, RetryPolicy};

fn remote_err(e: RedisError) -> RemoteError {
    if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        RemoteError::call("NETWORK_ERROR", e.to_string())
    } else if e.kind() == ErrorKind::TypeError {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::transient(e.to_string())
    }
}

pub struct RedisRecordIndex {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:")
    prefix: String,
}

impl RedisRecordIndex {
    pub async fn new(connection_string: &str) -> Result<Self, RemoteError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix, for sharing a Redis instance with
    /// other applications.
    ///
    /// ```rust,no_run
    /// # use hybrid_resolver::index::redis::RedisRecordIndex;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Hashes will be named "myapp:owner-index:0xabc..."
    /// let index = RedisRecordIndex::with_prefix("redis://localhost", Some("myapp:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, RemoteError> {
        let client = Client::open(connection_string)
            .map_err(|e| RemoteError::Fatal(format!("invalid redis url: {}", e)))?;

        let connection = retry("redis_index_connect", &RetryPolicy::startup(), || async {
            ConnectionManager::new(client.clone()).await.map_err(remote_err)
        })
        .await?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn owner_key(&self, owner_key: &str) -> String {
        format!("{}owner-index:{}", self.prefix, owner_key)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl RecordIndex for RedisRecordIndex {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn lookup(&self, owner_key: &str) -> Result<Vec<IndexEntry>, RemoteError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.owner_key(owner_key))
            .await
            .map_err(remote_err)?;

        let mut entries: Vec<IndexEntry> = fields
            .into_iter()
            .map(|(record_id, raw)| {
                let light_metadata = serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!(owner = %owner_key, record_id = %record_id, error = %e, "Unreadable index metadata");
                    Value::Null
                });
                IndexEntry {
                    owner_key: owner_key.to_string(),
                    record_id,
                    light_metadata,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.record_id.cmp(&b.record_id));

        Ok(entries)
    }

    async fn publish(&self, entry: &IndexEntry) -> Result<(), RemoteError> {
        let metadata = serde_json::to_string(&entry.light_metadata)
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(self.owner_key(&entry.owner_key), &entry.record_id, metadata)
            .await
            .map_err(remote_err)
    }
}
