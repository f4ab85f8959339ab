// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid record resolver.
//!
//! The [`HybridResolver`] answers "which records does this owner hold?" by
//! walking four tiers, cheapest first:
//!
//! ```text
//! 1. cache        hit → return now, refresh in the background
//! 2. index        owner → record ids (advisory, may be stale or empty)
//! 3. fetch        ids → full records from ground truth, in retried batches;
//!                 failed ids become placeholders
//! 4. enumeration  full ground-truth scan when 2–3 found no full record;
//!                 authoritative, and published back to the index
//! ```
//!
//! The worst case is an empty result. The only error is
//! [`ResolveError::NoTierEnabled`].
//!
//! # Background work
//!
//! Cache-hit refreshes and index write-backs run on a bounded queue drained
//! by a single worker with limited concurrency. Outcomes are reported as
//! [`ResolverEvent`]s via [`HybridResolver::subscribe`].
//!
//! # Example
//!
//! ```rust,no_run
//! use hybrid_resolver::{HybridResolver, RecordCache, ResolverConfig, ResolveOptions, TtlClass};
//! use hybrid_resolver::index::memory::InMemoryRecordIndex;
//! # use hybrid_resolver::{GroundTruth, Record, RemoteError};
//! # use async_trait::async_trait;
//! use std::sync::Arc;
//! # struct Ledger;
//! # #[async_trait]
//! # impl GroundTruth for Ledger {
//! #     async fn get_record(&self, _: &str) -> Result<Option<Record>, RemoteError> { Ok(None) }
//! #     async fn enumerate_by_owner(&self, _: &str) -> Result<Vec<Record>, RemoteError> { Ok(vec![]) }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = ResolverConfig::default();
//! let cache = Arc::new(RecordCache::open(&config, TtlClass::Short).await);
//! let resolver = HybridResolver::new(
//!     config,
//!     cache,
//!     Arc::new(InMemoryRecordIndex::new()),
//!     Arc::new(Ledger),
//! );
//!
//! let result = resolver.get_records("0xowner", ResolveOptions::default()).await.unwrap();
//! println!("{} records from {}", result.records.len(), result.source);
//!
//! resolver.shutdown().await;
//! # }
//! ```

mod types;
mod tiers;
mod refresh;

pub use types::{
    JobKind, OwnerPhase, ResolveError, ResolveOptions, ResolveResult, ResolveSource,
    ResolverEvent, SkipReason,
};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::config::ResolverConfig;
use crate::index::RecordIndex;
use crate::ledger::GroundTruth;
use crate::record::{IndexEntry, Record};
use crate::resilience::batch::BatchOptions;
use crate::resilience::retry::RetryPolicy;

use refresh::{InFlightGuard, Job};

/// State shared between the caller-facing resolver and its background worker.
pub(crate) struct ResolverCore {
    pub(super) cache: Arc<RecordCache>,
    pub(super) index: Arc<dyn RecordIndex>,
    pub(super) ledger: Arc<dyn GroundTruth>,

    pub(super) ledger_policy: RetryPolicy,
    pub(super) index_policy: RetryPolicy,
    pub(super) batch: BatchOptions,

    /// Bumped by `invalidate`; write-backs from older generations are dropped
    generations: DashMap<String, u64>,

    /// Logical phase per owner (absent = Cold)
    phases: DashMap<String, OwnerPhase>,

    /// Owners with a refresh queued or running
    pub(super) in_flight: Arc<DashSet<String>>,

    /// Jobs queued or running
    pub(super) pending_jobs: AtomicUsize,

    pub(super) events: broadcast::Sender<ResolverEvent>,
}

impl ResolverCore {
    pub(super) fn generation(&self, owner_key: &str) -> u64 {
        self.generations.get(owner_key).map(|g| *g).unwrap_or(0)
    }

    fn bump_generation(&self, owner_key: &str) -> u64 {
        let mut generation = self.generations.entry(owner_key.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub(super) fn set_phase(&self, owner_key: &str, phase: OwnerPhase) {
        self.phases.insert(owner_key.to_string(), phase);
    }

    pub(super) fn emit(&self, event: ResolverEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Cache a non-empty result unless the owner was invalidated since
    /// `generation` was read. Returns whether the write happened.
    pub(super) async fn write_back(&self, owner_key: &str, generation: u64, records: &[Record]) -> bool {
        if records.is_empty() {
            return false;
        }
        if self.generation(owner_key) != generation {
            debug!(owner = %owner_key, "Owner invalidated during resolution, discarding write-back");
            return false;
        }
        self.cache.put(owner_key, records.to_vec()).await;
        true
    }
}

/// Retry policies for the resolver's remote calls.
#[derive(Debug, Clone)]
pub struct ResolverPolicies {
    /// Ground-truth reads (targeted fetch and enumeration)
    pub ledger: RetryPolicy,
    /// Index lookups and publishes
    pub index: RetryPolicy,
}

impl ResolverPolicies {
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            ledger: RetryPolicy::from_config(config),
            index: RetryPolicy::index(),
        }
    }
}

/// Session-scoped resolver service.
///
/// Create one per session inside a Tokio runtime (the constructor spawns the
/// background worker) and share it by reference or `Arc`. Call
/// [`shutdown`](Self::shutdown) before dropping it; a plain drop discards
/// queued background jobs.
pub struct HybridResolver {
    core: Arc<ResolverCore>,
    jobs: mpsc::Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    job_seq: AtomicU64,
}

impl HybridResolver {
    pub fn new(
        config: ResolverConfig,
        cache: Arc<RecordCache>,
        index: Arc<dyn RecordIndex>,
        ledger: Arc<dyn GroundTruth>,
    ) -> Self {
        let policies = ResolverPolicies::from_config(&config);
        Self::with_policies(config, cache, index, ledger, policies)
    }

    /// Like [`new`](Self::new) with explicit retry policies.
    pub fn with_policies(
        config: ResolverConfig,
        cache: Arc<RecordCache>,
        index: Arc<dyn RecordIndex>,
        ledger: Arc<dyn GroundTruth>,
        policies: ResolverPolicies,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (jobs, job_rx) = mpsc::channel(config.refresh_queue_capacity.max(1));

        let core = Arc::new(ResolverCore {
            cache,
            index,
            ledger,
            ledger_policy: policies.ledger,
            index_policy: policies.index,
            batch: BatchOptions::from_config(&config),
            generations: DashMap::new(),
            phases: DashMap::new(),
            in_flight: Arc::new(DashSet::new()),
            pending_jobs: AtomicUsize::new(0),
            events,
        });

        let worker = tokio::spawn(refresh::run_worker(
            core.clone(),
            job_rx,
            config.refresh_concurrency.max(1),
        ));

        info!(
            queue_capacity = config.refresh_queue_capacity,
            concurrency = config.refresh_concurrency,
            "Hybrid resolver started"
        );

        Self {
            core,
            jobs,
            worker: Mutex::new(Some(worker)),
            job_seq: AtomicU64::new(0),
        }
    }

    /// Resolve every record `owner_key` currently holds.
    #[tracing::instrument(skip(self, options), fields(owner = %owner_key, tier))]
    pub async fn get_records(
        &self,
        owner_key: &str,
        options: ResolveOptions,
    ) -> Result<ResolveResult, ResolveError> {
        if !options.any_enabled() {
            return Err(ResolveError::NoTierEnabled);
        }
        let started = Instant::now();

        if options.use_cache {
            let _timer = crate::metrics::LatencyTimer::new("cache");
            if let Some(set) = self.core.cache.get(owner_key).await {
                tracing::Span::current().record("tier", "cache");
                crate::metrics::record_tier("cache", "hit");
                self.core.set_phase(owner_key, OwnerPhase::ServedStale);
                self.schedule_refresh(owner_key, options);

                crate::metrics::record_resolve("cache", set.records.len(), started.elapsed());
                return Ok(ResolveResult {
                    records: set.records,
                    source: ResolveSource::Cache,
                    cached: true,
                });
            }
            crate::metrics::record_tier("cache", "empty");
        }

        let generation = self.core.generation(owner_key);
        let resolution = self.core.resolve_uncached(owner_key, &options, true).await;
        tracing::Span::current().record("tier", resolution.deepest_tier);

        if resolution.is_degraded() {
            warn!(
                owner = %owner_key,
                placeholders = resolution.records.len(),
                "Resolution degraded, keeping cached records"
            );
        } else {
            self.core.write_back(owner_key, generation, &resolution.records).await;
        }
        if resolution.enumerated && !resolution.records.is_empty() {
            let entries = resolution.records.iter().map(IndexEntry::from_record).collect();
            self.enqueue(Job::Publish {
                owner_key: owner_key.to_string(),
                entries,
            });
        }
        self.core.set_phase(owner_key, OwnerPhase::ServedFresh);

        crate::metrics::record_resolve(
            resolution.source.label(),
            resolution.records.len(),
            started.elapsed(),
        );
        debug!(
            owner = %owner_key,
            source = %resolution.source,
            count = resolution.records.len(),
            "Resolved records"
        );

        Ok(ResolveResult {
            records: resolution.records,
            source: resolution.source,
            cached: false,
        })
    }

    /// Cached records without an await point, for first paint. TTL applies.
    #[must_use]
    pub fn peek(&self, owner_key: &str) -> Option<Vec<Record>> {
        self.core.cache.get_sync(owner_key).map(|set| set.records)
    }

    /// Queue a background refresh of `owner_key` (the cache tier is skipped).
    ///
    /// Returns `false` if one is already queued or running for this owner, or
    /// the queue is full.
    pub fn schedule_refresh(&self, owner_key: &str, options: ResolveOptions) -> bool {
        let Some(guard) = InFlightGuard::claim(&self.core.in_flight, owner_key) else {
            debug!(owner = %owner_key, "Refresh already in flight");
            crate::metrics::record_background_job(JobKind::Refresh.label(), "skipped");
            self.core.emit(ResolverEvent::RefreshSkipped {
                owner_key: owner_key.to_string(),
                reason: SkipReason::AlreadyInFlight,
            });
            return false;
        };

        self.enqueue(Job::Refresh {
            owner_key: owner_key.to_string(),
            generation: self.core.generation(owner_key),
            options: ResolveOptions {
                use_cache: false,
                ..options
            },
            _guard: guard,
        })
    }

    fn enqueue(&self, job: Job) -> bool {
        let seq = self.job_seq.fetch_add(1, Ordering::Relaxed);
        let owner_key = job.owner_key().to_string();
        let kind = job.kind();

        // Counted before sending so the worker's decrement never runs first
        let pending = self.core.pending_jobs.fetch_add(1, Ordering::AcqRel) + 1;

        match self.jobs.try_send(job) {
            Ok(()) => {
                crate::metrics::set_background_jobs_pending(pending);
                debug!(owner = %owner_key, kind = kind.map(|k| k.label()), seq, "Queued background job");
                true
            }
            Err(e) => {
                let pending = self.core.pending_jobs.fetch_sub(1, Ordering::AcqRel) - 1;
                crate::metrics::set_background_jobs_pending(pending);
                // Dropping the job releases its in-flight guard
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(owner = %owner_key, reason, "Background queue rejected job");
                if let Some(kind) = kind {
                    crate::metrics::record_background_job(kind.label(), "dropped");
                    self.core.emit(ResolverEvent::JobDropped { owner_key, kind });
                }
                false
            }
        }
    }

    /// Drop every cached record for `owner_key`. A refresh that is already
    /// resolving for this owner will not write its result back.
    pub async fn invalidate(&self, owner_key: &str) {
        let generation = self.core.bump_generation(owner_key);
        self.core.cache.invalidate(owner_key).await;
        self.core.phases.remove(owner_key);
        debug!(owner = %owner_key, generation, "Invalidated owner");
    }

    #[must_use]
    pub fn phase(&self, owner_key: &str) -> OwnerPhase {
        self.core
            .phases
            .get(owner_key)
            .map(|p| *p)
            .unwrap_or(OwnerPhase::Cold)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolverEvent> {
        self.core.events.subscribe()
    }

    /// Jobs queued or running.
    #[must_use]
    pub fn pending_background_jobs(&self) -> usize {
        self.core.pending_jobs.load(Ordering::Acquire)
    }

    /// Wait until every job queued before this call has finished.
    pub async fn flush_background(&self) {
        let (done, finished) = oneshot::channel();
        if self.jobs.send(Job::Barrier(done)).await.is_err() {
            return;
        }
        let _ = finished.await;
    }

    /// Stop accepting background work, finish what is queued, and wait for
    /// the worker to exit. Resolution keeps working without background refresh.
    ///
    /// Required for a clean exit: dropping the resolver aborts the worker.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.jobs.send(Job::Shutdown(done)).await.is_ok() {
            let _ = finished.await;
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Resolver worker ended abnormally");
            }
        }
        info!("Hybrid resolver shut down");
    }
}

/// Dropping without [`shutdown`](HybridResolver::shutdown) aborts the worker
/// and discards whatever is still queued.
impl Drop for HybridResolver {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            let pending = self.core.pending_jobs.load(Ordering::Acquire);
            if pending > 0 {
                warn!(pending, "Resolver dropped without shutdown, discarding background jobs");
            }
            worker.abort();
        }
    }
}
