//! # Hybrid Resolver
//!
//! Answers "which records does this owner hold?" against a slow, rate-limited
//! ledger, using a cache and an advisory index to avoid full scans.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Tier 1: Record Cache                    │
//! │  • Per-owner sets with TTL (short: 5 min, long: 24 h)      │
//! │  • SQL backend (SQLite/MySQL), in-memory fallover          │
//! │  • Hit → served immediately, refreshed in the background   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Tier 2: Record Index                    │
//! │  • owner → record ids (Redis, HTTP, or in-memory)          │
//! │  • Advisory: may be stale, empty, or down                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ ids
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tier 3: Targeted Fetch                     │
//! │  • Each id read from ground truth, batched and retried     │
//! │  • Failures become placeholders, not errors                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ no full record
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Tier 4: Enumeration                       │
//! │  • Full ground-truth scan, authoritative                   │
//! │  • Result published back to the index                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside the resolver, [`ConfirmationWaiter`] waits for submitted
//! mutations with a native wait that falls back to receipt polling.
//!
//! ## Configuration
//!
//! See [`ResolverConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`resolver`]: The [`HybridResolver`] and its background worker
//! - [`cache`]: TTL record cache over [`storage`] backends
//! - [`index`]: Secondary index clients (Redis, HTTP, memory)
//! - [`ledger`]: Ground-truth and receipt interfaces
//! - [`resilience`]: Retry with backoff, batched execution
//! - [`confirmation`]: Deadline-bounded confirmation waiting

pub mod config;
pub mod record;
pub mod ttl;
pub mod ledger;
pub mod resilience;
pub mod storage;
pub mod cache;
pub mod index;
pub mod confirmation;
pub mod resolver;
pub mod metrics;

pub use config::{LatencyClass, ResolverConfig};
pub use record::{
    AssetPayload, CachedRecordSet, IndexEntry, PoolPayload, ReceivablePayload, Record,
    RecordError, RecordKind, RecordPayload,
};
pub use ttl::TtlClass;
pub use ledger::{
    GroundTruth, Receipt, ReceiptOrigin, ReceiptSource, RemoteError, TransactionHandle,
};
pub use resilience::retry::{retry, RetryClassifier, RetryPolicy, Retryable};
pub use resilience::batch::{retry_batched, settle_all, settle_batched, BatchOptions};
pub use storage::traits::{CacheBackend, StorageError};
pub use cache::{BackendHealth, RecordCache};
pub use index::RecordIndex;
pub use confirmation::{ConfirmationWaiter, WaitError};
pub use resolver::{
    HybridResolver, JobKind, OwnerPhase, ResolveError, ResolveOptions, ResolveResult,
    ResolveSource, ResolverEvent, ResolverPolicies, SkipReason,
};
pub use metrics::LatencyTimer;
