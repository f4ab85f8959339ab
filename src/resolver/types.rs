// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the hybrid resolver.

use thiserror::Error;

use crate::record::Record;

/// Which tiers a single [`get_records`](super::HybridResolver::get_records)
/// call may use. All enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub use_cache: bool,
    pub use_index: bool,
    pub fallback_to_enumeration: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_index: true,
            fallback_to_enumeration: true,
        }
    }
}

impl ResolveOptions {
    /// Skip the cache, e.g. right after a known mutation.
    #[must_use]
    pub fn bypass_cache() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.use_cache || self.use_index || self.fallback_to_enumeration
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveSource {
    /// Served from the record cache
    Cache,
    /// Ids from the index, records fetched individually from ground truth
    Hybrid,
    /// Full enumeration of ground truth
    Blockchain,
}

impl ResolveSource {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Hybrid => "hybrid",
            Self::Blockchain => "blockchain",
        }
    }
}

impl std::fmt::Display for ResolveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveResult {
    /// Full records and placeholders; order is not guaranteed
    pub records: Vec<Record>,
    pub source: ResolveSource,
    /// Served from cache without touching ground truth
    pub cached: bool,
}

impl ResolveResult {
    /// Every enabled tier came up empty.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_placeholder()).count()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no resolution tier enabled (cache, index and enumeration all disabled)")]
    NoTierEnabled,
}

/// Logical resolution phase of one owner.
///
/// ```text
/// Cold → ServedStale → ServedFresh
/// Cold → Indexing → Resolving → (Enumerating →) ServedFresh
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerPhase {
    /// Nothing served yet (or invalidated)
    Cold,
    /// Cached data served, background refresh pending
    ServedStale,
    /// Looking up ids in the index
    Indexing,
    /// Fetching records by id
    Resolving,
    /// Enumerating ground truth
    Enumerating,
    /// Served straight from ground truth, or a refresh landed
    ServedFresh,
}

impl std::fmt::Display for OwnerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cold => write!(f, "Cold"),
            Self::ServedStale => write!(f, "ServedStale"),
            Self::Indexing => write!(f, "Indexing"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Enumerating => write!(f, "Enumerating"),
            Self::ServedFresh => write!(f, "ServedFresh"),
        }
    }
}

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Refresh,
    IndexPublish,
}

impl JobKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::IndexPublish => "index_publish",
        }
    }
}

/// Why a refresh didn't run or didn't land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A refresh for this owner is already queued or running
    AlreadyInFlight,
    /// The owner was invalidated while the refresh was resolving
    Invalidated,
}

/// Background outcomes, published on the channel returned by
/// [`subscribe`](super::HybridResolver::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverEvent {
    RefreshCompleted {
        owner_key: String,
        record_count: usize,
        source: ResolveSource,
    },
    /// Refresh resolved nothing and at least one tier errored; the cached
    /// set was left untouched
    RefreshFailed {
        owner_key: String,
        reason: String,
    },
    RefreshSkipped {
        owner_key: String,
        reason: SkipReason,
    },
    /// Queue full or closed
    JobDropped {
        owner_key: String,
        kind: JobKind,
    },
    IndexPublished {
        owner_key: String,
        count: usize,
    },
    IndexPublishFailed {
        owner_key: String,
        record_id: String,
        error: String,
    },
}
