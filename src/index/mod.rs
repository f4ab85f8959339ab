// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Secondary owner → record index.
//!
//! The index is advisory and eventually consistent. It only tells the
//! resolver which ids to fetch; ground truth decides what is returned.
//!
//! - [`memory`]: in-process map (tests, single-node deployments)
//! - [`redis`]: one hash per owner
//! - [`http`]: remote index service

pub mod memory;
pub mod redis;
pub mod http;

use async_trait::async_trait;

use crate::ledger::RemoteError;
use crate::record::IndexEntry;

#[async_trait]
pub trait RecordIndex: Send + Sync {
    /// Short name for logs and metric labels.
    fn name(&self) -> &'static str;

    /// Entries currently indexed for `owner_key`. Unknown owners yield an
    /// empty list, not an error.
    async fn lookup(&self, owner_key: &str) -> Result<Vec<IndexEntry>, RemoteError>;

    /// Insert or overwrite one entry, keyed by `(owner_key, record_id)`.
    async fn publish(&self, entry: &IndexEntry) -> Result<(), RemoteError>;
}
