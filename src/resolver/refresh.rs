// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background worker: cache refreshes and index write-backs.
//!
//! One worker task drains a bounded queue and runs up to `concurrency` jobs
//! at once on a [`JoinSet`]. Control messages ride the same queue, so a
//! barrier only resolves once every job queued before it has finished.

use dashmap::DashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{JobKind, OwnerPhase, ResolveOptions, ResolverCore, ResolverEvent, SkipReason};
use crate::record::IndexEntry;
use crate::resilience::batch::settle_batched;

pub(super) enum Job {
    Refresh {
        owner_key: String,
        generation: u64,
        options: ResolveOptions,
        /// Held until the job finishes (or is dropped unqueued)
        _guard: InFlightGuard,
    },
    Publish {
        owner_key: String,
        entries: Vec<IndexEntry>,
    },
    /// Signalled once everything queued earlier has finished
    Barrier(oneshot::Sender<()>),
    /// Stop accepting work, drain, then exit
    Shutdown(oneshot::Sender<()>),
}

impl Job {
    pub(super) fn owner_key(&self) -> &str {
        match self {
            Self::Refresh { owner_key, .. } | Self::Publish { owner_key, .. } => owner_key,
            Self::Barrier(_) | Self::Shutdown(_) => "",
        }
    }

    pub(super) fn kind(&self) -> Option<JobKind> {
        match self {
            Self::Refresh { .. } => Some(JobKind::Refresh),
            Self::Publish { .. } => Some(JobKind::IndexPublish),
            Self::Barrier(_) | Self::Shutdown(_) => None,
        }
    }
}

/// Marks an owner as having a refresh queued or running. Released on drop.
pub(super) struct InFlightGuard {
    set: Arc<DashSet<String>>,
    owner_key: String,
}

impl InFlightGuard {
    /// `None` if the owner is already claimed.
    pub(super) fn claim(set: &Arc<DashSet<String>>, owner_key: &str) -> Option<Self> {
        if !set.insert(owner_key.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            owner_key: owner_key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.owner_key);
    }
}

pub(super) async fn run_worker(core: Arc<ResolverCore>, mut rx: mpsc::Receiver<Job>, concurrency: usize) {
    let mut running: JoinSet<()> = JoinSet::new();
    let mut shutdown: Option<oneshot::Sender<()>> = None;

    loop {
        let next = tokio::select! {
            biased;
            Some(joined) = running.join_next(), if !running.is_empty() => {
                log_join(joined);
                continue;
            }
            next = rx.recv() => next,
        };

        // Closed and drained
        let Some(job) = next else { break };

        match job {
            Job::Barrier(done) => {
                drain(&mut running).await;
                let _ = done.send(());
            }
            Job::Shutdown(done) => {
                info!(queued = core.pending_jobs.load(Ordering::Acquire), "Resolver worker draining");
                rx.close();
                shutdown = Some(done);
            }
            job => {
                while running.len() >= concurrency {
                    if let Some(joined) = running.join_next().await {
                        log_join(joined);
                    }
                }
                let core = core.clone();
                running.spawn(async move {
                    core.run_job(job).await;
                    let pending = core
                        .pending_jobs
                        .fetch_sub(1, Ordering::AcqRel)
                        .saturating_sub(1);
                    crate::metrics::set_background_jobs_pending(pending);
                });
            }
        }
    }

    drain(&mut running).await;
    if let Some(done) = shutdown {
        let _ = done.send(());
    }
    debug!("Resolver worker stopped");
}

async fn drain(running: &mut JoinSet<()>) {
    while let Some(joined) = running.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Background job panicked");
    }
}

impl ResolverCore {
    async fn run_job(&self, job: Job) {
        match job {
            Job::Refresh {
                owner_key,
                generation,
                options,
                _guard,
            } => {
                self.run_refresh(&owner_key, generation, &options).await;
                drop(_guard);
            }
            Job::Publish { owner_key, entries } => {
                let failed = self.publish_entries(&owner_key, entries).await;
                let outcome = if failed == 0 { "completed" } else { "failed" };
                crate::metrics::record_background_job(JobKind::IndexPublish.label(), outcome);
            }
            Job::Barrier(_) | Job::Shutdown(_) => {}
        }
    }

    /// Re-resolve below the cache and overwrite the cached set.
    ///
    /// An empty result never replaces cached data, nor does a set of
    /// placeholders produced by failing calls.
    #[tracing::instrument(skip(self, options), fields(owner = %owner_key))]
    async fn run_refresh(&self, owner_key: &str, generation: u64, options: &ResolveOptions) {
        let label = JobKind::Refresh.label();
        let resolution = self.resolve_uncached(owner_key, options, false).await;
        if resolution.records.is_empty() || resolution.is_degraded() {
            if resolution.had_errors {
                warn!(owner = %owner_key, "Refresh failed, keeping cached records");
                crate::metrics::record_background_job(label, "failed");
                self.emit(ResolverEvent::RefreshFailed {
                    owner_key: owner_key.to_string(),
                    reason: format!("no full records resolved via {}", resolution.deepest_tier),
                });
            } else {
                debug!(owner = %owner_key, "Refresh found nothing, keeping cached records");
                crate::metrics::record_background_job(label, "completed");
                self.emit(ResolverEvent::RefreshCompleted {
                    owner_key: owner_key.to_string(),
                    record_count: 0,
                    source: resolution.source,
                });
            }
            return;
        }

        if !self.write_back(owner_key, generation, &resolution.records).await {
            crate::metrics::record_background_job(label, "skipped");
            self.emit(ResolverEvent::RefreshSkipped {
                owner_key: owner_key.to_string(),
                reason: SkipReason::Invalidated,
            });
            return;
        }

        // Inline so a barrier covers the write-back too
        if resolution.enumerated {
            let entries = resolution.records.iter().map(IndexEntry::from_record).collect();
            self.publish_entries(owner_key, entries).await;
        }

        self.set_phase(owner_key, OwnerPhase::ServedFresh);
        crate::metrics::record_background_job(label, "completed");
        debug!(
            owner = %owner_key,
            count = resolution.records.len(),
            source = %resolution.source,
            "Refresh landed"
        );
        self.emit(ResolverEvent::RefreshCompleted {
            owner_key: owner_key.to_string(),
            record_count: resolution.records.len(),
            source: resolution.source,
        });
    }

    /// Write enumerated records back to the index. Returns the failure count.
    async fn publish_entries(&self, owner_key: &str, entries: Vec<IndexEntry>) -> usize {
        let index = &self.index;
        let settled = settle_batched(
            "index_publish",
            entries,
            &self.batch,
            &self.index_policy,
            |entry: IndexEntry| async move { index.publish(&entry).await },
        )
        .await;

        let mut published = 0usize;
        let mut failed = 0usize;
        for (entry, outcome) in settled {
            match outcome {
                Ok(()) => published += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        owner = %owner_key,
                        record_id = %entry.record_id,
                        index = index.name(),
                        error = %e,
                        "Index publish failed"
                    );
                    self.emit(ResolverEvent::IndexPublishFailed {
                        owner_key: owner_key.to_string(),
                        record_id: entry.record_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if published > 0 {
            debug!(owner = %owner_key, published, "Published enumerated records to index");
            self.emit(ResolverEvent::IndexPublished {
                owner_key: owner_key.to_string(),
                count: published,
            });
        }
        failed
    }
}
