// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record schema.
//!
//! A [`Record`] is the unit the resolver hands back to callers. Each record has
//! a stable identity (`record_id`), the owner it was resolved for, the time it
//! was fetched from ground truth, and a typed payload.
//!
//! # Example
//!
//! ```
//! use hybrid_resolver::{Record, RecordPayload, AssetPayload};
//!
//! let record = Record::new(
//!     "asset-17".into(),
//!     "0xowner".into(),
//!     RecordPayload::Asset(AssetPayload {
//!         name: Some("Invoice #17".into()),
//!         ..Default::default()
//!     }),
//! );
//! assert!(!record.is_placeholder());
//! assert!(record.validate_for_owner("0xowner").is_ok());
//!
//! let stub = Record::placeholder("asset-18", "0xowner");
//! assert!(stub.is_placeholder());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Current wall-clock time in epoch millis.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has an empty record_id")]
    EmptyId,
    #[error("record '{0}' has an empty owner_key")]
    EmptyOwner(String),
    #[error("record '{record_id}' belongs to '{actual}', expected '{expected}'")]
    OwnerMismatch {
        record_id: String,
        expected: String,
        actual: String,
    },
}

/// Tokenized asset as read from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    /// Content-addressed metadata location (e.g. `ipfs://...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
    /// Decimal string, ledger precision is preserved as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valuation: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivablePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_value: Option<String>,
    /// Epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Typed payload, one variant per record kind.
///
/// `Placeholder` stands in for a known id whose full payload could not be
/// fetched. It carries no data beyond the identity fields on [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Asset(AssetPayload),
    Pool(PoolPayload),
    Receivable(ReceivablePayload),
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Asset,
    Pool,
    Receivable,
    Placeholder,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asset => write!(f, "asset"),
            Self::Pool => write!(f, "pool"),
            Self::Receivable => write!(f, "receivable"),
            Self::Placeholder => write!(f, "placeholder"),
        }
    }
}

impl RecordPayload {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Asset(_) => RecordKind::Asset,
            Self::Pool(_) => RecordKind::Pool,
            Self::Receivable(_) => RecordKind::Receivable,
            Self::Placeholder => RecordKind::Placeholder,
        }
    }

    fn display_name(&self) -> Option<&str> {
        match self {
            Self::Asset(a) => a.name.as_deref(),
            Self::Pool(p) => p.name.as_deref(),
            Self::Receivable(_) | Self::Placeholder => None,
        }
    }
}

/// A resolved record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identity on the ledger
    pub record_id: String,
    /// Owner the record is currently held by
    pub owner_key: String,
    /// When the payload was read from ground truth (epoch millis)
    pub fetched_at: i64,
    pub payload: RecordPayload,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(record_id: String, owner_key: String, payload: RecordPayload) -> Self {
        Self {
            record_id,
            owner_key,
            fetched_at: now_millis(),
            payload,
        }
    }

    /// Minimal stand-in for an id that failed to resolve.
    pub fn placeholder(record_id: &str, owner_key: &str) -> Self {
        Self::new(
            record_id.to_string(),
            owner_key.to_string(),
            RecordPayload::Placeholder,
        )
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self.payload, RecordPayload::Placeholder)
    }

    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// Check the identity fields.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.record_id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        if self.owner_key.is_empty() {
            return Err(RecordError::EmptyOwner(self.record_id.clone()));
        }
        Ok(())
    }

    /// Check the identity fields and that the record belongs to `owner_key`.
    pub fn validate_for_owner(&self, owner_key: &str) -> Result<(), RecordError> {
        self.validate()?;
        if self.owner_key != owner_key {
            return Err(RecordError::OwnerMismatch {
                record_id: self.record_id.clone(),
                expected: owner_key.to_string(),
                actual: self.owner_key.clone(),
            });
        }
        Ok(())
    }

    /// Lightweight summary pushed to the secondary index.
    #[must_use]
    pub fn light_metadata(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("kind".to_string(), Value::String(self.kind().to_string()));
        if let Some(name) = self.payload.display_name() {
            meta.insert("name".to_string(), Value::String(name.to_string()));
        }
        Value::Object(meta)
    }
}

/// All cached records for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecordSet {
    pub owner_key: String,
    pub records: Vec<Record>,
    /// Epoch millis of the write that produced this set
    pub fetched_at: i64,
}

impl CachedRecordSet {
    pub fn new(owner_key: String, records: Vec<Record>) -> Self {
        Self {
            owner_key,
            records,
            fetched_at: now_millis(),
        }
    }

    /// Expired once strictly more than `ttl` has passed since `fetched_at`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now_ms: i64) -> bool {
        let age = now_ms.saturating_sub(self.fetched_at);
        age > ttl.as_millis() as i64
    }

    /// Validate every record against this set's owner.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.owner_key.is_empty() {
            return Err(RecordError::EmptyOwner(String::new()));
        }
        self.records
            .iter()
            .try_for_each(|r| r.validate_for_owner(&self.owner_key))
    }
}

/// Advisory owner → record mapping from the secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub owner_key: String,
    pub record_id: String,
    #[serde(default)]
    pub light_metadata: Value,
}

impl IndexEntry {
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            owner_key: record.owner_key.clone(),
            record_id: record.record_id.clone(),
            light_metadata: record.light_metadata(),
        }
    }

    /// Index entries are only usable with a record id and the right owner.
    #[must_use]
    pub fn is_usable_for(&self, owner_key: &str) -> bool {
        !self.record_id.is_empty() && (self.owner_key.is_empty() || self.owner_key == owner_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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

    #[test]
    fn test_new_record_is_stamped() {
        let record = asset("a-1", "owner");
        assert!(record.fetched_at > 0);
        assert_eq!(record.kind(), RecordKind::Asset);
        assert!(!record.is_placeholder());
    }

    #[test]
    fn test_placeholder_carries_identity_only() {
        let stub = Record::placeholder("a-9", "owner");
        assert_eq!(stub.record_id, "a-9");
        assert_eq!(stub.owner_key, "owner");
        assert!(stub.is_placeholder());
        assert_eq!(stub.light_metadata(), json!({"kind": "placeholder"}));
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        let mut record = asset("a-1", "owner");
        record.record_id.clear();
        assert_eq!(record.validate(), Err(RecordError::EmptyId));

        let mut record = asset("a-1", "owner");
        record.owner_key.clear();
        assert!(matches!(record.validate(), Err(RecordError::EmptyOwner(_))));
    }

    #[test]
    fn test_validate_for_owner_detects_transfer() {
        let record = asset("a-1", "new-owner");
        let err = record.validate_for_owner("old-owner").unwrap_err();
        assert!(matches!(err, RecordError::OwnerMismatch { .. }));
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let record = Record::new(
            "p-1".into(),
            "owner".into(),
            RecordPayload::Pool(PoolPayload {
                name: Some("Senior".into()),
                asset_ids: vec!["a-1".into()],
                ..Default::default()
            }),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["payload"]["kind"], "pool");
        assert_eq!(value["payload"]["asset_ids"], json!(["a-1"]));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = json!({
            "record_id": "x",
            "owner_key": "o",
            "fetched_at": 1,
            "payload": {"kind": "mystery"}
        });
        assert!(serde_json::from_value::<Record>(raw).is_err());
    }

    #[test]
    fn test_record_set_expiry_is_strict() {
        let mut set = CachedRecordSet::new("owner".into(), vec![]);
        set.fetched_at = 10_000;
        let ttl = Duration::from_secs(5);

        assert!(!set.is_expired(ttl, 15_000));
        assert!(set.is_expired(ttl, 15_001));
    }

    #[test]
    fn test_record_set_validate_checks_owner() {
        let set = CachedRecordSet::new("owner".into(), vec![asset("a-1", "someone-else")]);
        assert!(set.validate().is_err());

        let set = CachedRecordSet::new("owner".into(), vec![asset("a-1", "owner")]);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_index_entry_usability() {
        let entry = IndexEntry::from_record(&asset("a-1", "owner"));
        assert!(entry.is_usable_for("owner"));
        assert!(!entry.is_usable_for("other"));
        assert_eq!(entry.light_metadata["name"], "Asset a-1");

        let blank = IndexEntry {
            owner_key: String::new(),
            record_id: String::new(),
            light_metadata: Value::Null,
        };
        assert!(!blank.is_usable_for("owner"));
    }
}
