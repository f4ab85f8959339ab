// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::RecordIndex;
use crate::ledger::RemoteError;
use crate::record::IndexEntry;

/// In-process index. Entries are kept per owner, ordered by record id.
#[derive(Default)]
pub struct InMemoryRecordIndex {
    owners: DashMap<String, BTreeMap<String, IndexEntry>>,
}

impl InMemoryRecordIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one entry, e.g. after the record moved to another owner.
    pub fn remove(&self, owner_key: &str, record_id: &str) -> bool {
        self.owners
            .get_mut(owner_key)
            .map(|mut entries| entries.remove(record_id).is_some())
            .unwrap_or(false)
    }

    /// Number of entries for `owner_key`.
    #[must_use]
    pub fn count(&self, owner_key: &str) -> usize {
        self.owners.get(owner_key).map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordIndex for InMemoryRecordIndex {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(&self, owner_key: &str) -> Result<Vec<IndexEntry>, RemoteError> {
        Ok(self
            .owners
            .get(owner_key)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, entry: &IndexEntry) -> Result<(), RemoteError> {
        if entry.owner_key.is_empty() || entry.record_id.is_empty() {
            return Err(RemoteError::Fatal(format!(
                "index entry needs owner and record id (owner='{}', record='{}')",
                entry.owner_key, entry.record_id
            )));
        }
        self.owners
            .entry(entry.owner_key.clone())
            .or_default()
            .insert(entry.record_id.clone(), entry.clone());
        Ok(())
    }
}
