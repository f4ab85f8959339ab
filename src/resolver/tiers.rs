// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Uncached resolution: index lookup, targeted fetch, enumeration.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::{OwnerPhase, ResolveOptions, ResolveSource, ResolverCore};
use crate::ledger::RemoteError;
use crate::metrics::LatencyTimer;
use crate::record::{Record, RecordError};
use crate::resilience::batch::settle_batched;
use crate::resilience::retry::retry;

/// Outcome of the tiers below the cache.
pub(super) struct Resolution {
    pub records: Vec<Record>,
    pub source: ResolveSource,
    /// Deepest tier that ran, for the span's `tier` field
    pub deepest_tier: &'static str,
    /// The result came from enumeration and should be published to the index
    pub enumerated: bool,
    /// Some tier failed outright (not just came up empty)
    pub had_errors: bool,
}

impl Resolution {
    /// Only placeholders, and at least one of them stands for a failed call.
    /// Such a result must not replace cached records.
    pub fn is_degraded(&self) -> bool {
        self.had_errors && self.records.iter().all(|r| r.is_placeholder())
    }
}

/// Result of fetching a list of ids by id.
struct Fetched {
    records: Vec<Record>,
    full: usize,
    placeholders: usize,
    had_errors: bool,
}

impl ResolverCore {
    /// Run tiers 2–4 for `owner_key`. Never fails: the worst case is empty.
    ///
    /// `track_phase` is off for background refreshes, which keep the owner in
    /// `ServedStale` until they land.
    pub(super) async fn resolve_uncached(
        &self,
        owner_key: &str,
        options: &ResolveOptions,
        track_phase: bool,
    ) -> Resolution {
        let mut resolution = Resolution {
            records: Vec::new(),
            source: ResolveSource::Cache,
            deepest_tier: "none",
            enumerated: false,
            had_errors: false,
        };

        if options.use_index {
            if track_phase {
                self.set_phase(owner_key, OwnerPhase::Indexing);
            }
            resolution.source = ResolveSource::Hybrid;
            resolution.deepest_tier = "index";

            match self.lookup_ids(owner_key).await {
                Ok(ids) if !ids.is_empty() => {
                    if track_phase {
                        self.set_phase(owner_key, OwnerPhase::Resolving);
                    }
                    resolution.deepest_tier = "fetch";
                    let fetched = self.fetch_by_ids(owner_key, ids).await;
                    resolution.had_errors |= fetched.had_errors;
                    resolution.records = fetched.records;
                }
                Ok(_) => {}
                Err(_) => resolution.had_errors = true,
            }
        }

        let full = resolution.records.iter().filter(|r| !r.is_placeholder()).count();
        if options.fallback_to_enumeration && full == 0 {
            if track_phase {
                self.set_phase(owner_key, OwnerPhase::Enumerating);
            }
            resolution.deepest_tier = "enumeration";
            if resolution.records.is_empty() {
                resolution.source = ResolveSource::Blockchain;
            }

            match self.enumerate(owner_key).await {
                Ok(records) if !records.is_empty() => {
                    // Authoritative: replaces any placeholders from tier 3
                    resolution.records = records;
                    resolution.source = ResolveSource::Blockchain;
                    resolution.enumerated = true;
                }
                Ok(_) => {}
                Err(_) => resolution.had_errors = true,
            }
        }

        resolution
    }

    /// Tier 2: distinct usable record ids from the index, in index order.
    async fn lookup_ids(&self, owner_key: &str) -> Result<Vec<String>, RemoteError> {
        let _timer = LatencyTimer::new("index");

        let entries = retry("index_lookup", &self.index_policy, || self.index.lookup(owner_key))
            .await
            .map_err(|e| {
                warn!(owner = %owner_key, index = self.index.name(), error = %e, "Index lookup failed");
                crate::metrics::record_tier("index", "error");
                e
            })?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.is_usable_for(owner_key))
            .filter(|entry| seen.insert(entry.record_id.clone()))
            .map(|entry| entry.record_id)
            .collect();

        crate::metrics::record_tier("index", if ids.is_empty() { "empty" } else { "hit" });
        debug!(owner = %owner_key, count = ids.len(), "Index lookup complete");
        Ok(ids)
    }

    /// Tier 3: fetch each id from ground truth in retried batches.
    ///
    /// Ids that fail or don't exist become placeholders. Records that now
    /// belong to someone else are dropped (the index entry was stale).
    async fn fetch_by_ids(&self, owner_key: &str, ids: Vec<String>) -> Fetched {
        let _timer = LatencyTimer::new("fetch");
        let ledger = &self.ledger;

        let settled = settle_batched(
            "ledger_get_record",
            ids,
            &self.batch,
            &self.ledger_policy,
            |id: String| async move { ledger.get_record(&id).await },
        )
        .await;

        let mut fetched = Fetched {
            records: Vec::with_capacity(settled.len()),
            full: 0,
            placeholders: 0,
            had_errors: false,
        };
        let mut stale = 0usize;

        for (id, outcome) in settled {
            match outcome {
                Ok(Some(record)) => match record.validate_for_owner(owner_key) {
                    Ok(()) => {
                        fetched.full += 1;
                        fetched.records.push(record);
                    }
                    Err(RecordError::OwnerMismatch { actual, .. }) => {
                        debug!(owner = %owner_key, record_id = %id, now_owned_by = %actual, "Dropping stale index entry");
                        stale += 1;
                    }
                    Err(e) => {
                        warn!(owner = %owner_key, record_id = %id, error = %e, "Ground truth returned an invalid record");
                        fetched.placeholders += 1;
                        fetched.records.push(Record::placeholder(&id, owner_key));
                    }
                },
                Ok(None) | Err(RemoteError::NotFound(_)) => {
                    debug!(owner = %owner_key, record_id = %id, "Indexed record not found in ground truth");
                    fetched.placeholders += 1;
                    fetched.records.push(Record::placeholder(&id, owner_key));
                }
                Err(e) => {
                    warn!(owner = %owner_key, record_id = %id, error = %e, "Record fetch failed, using placeholder");
                    fetched.had_errors = true;
                    fetched.placeholders += 1;
                    fetched.records.push(Record::placeholder(&id, owner_key));
                }
            }
        }

        if fetched.placeholders > 0 {
            crate::metrics::record_placeholders(fetched.placeholders);
        }
        if stale > 0 {
            crate::metrics::record_stale_index_entries(stale);
        }
        crate::metrics::record_tier("fetch", if fetched.full > 0 { "hit" } else { "empty" });
        debug!(
            owner = %owner_key,
            full = fetched.full,
            placeholders = fetched.placeholders,
            stale,
            "Targeted fetch complete"
        );

        fetched
    }

    /// Tier 4: enumerate ground truth, keeping one record per id.
    async fn enumerate(&self, owner_key: &str) -> Result<Vec<Record>, RemoteError> {
        let _timer = LatencyTimer::new("enumeration");

        let records = retry("ledger_enumerate", &self.ledger_policy, || {
            self.ledger.enumerate_by_owner(owner_key)
        })
        .await
        .map_err(|e| {
            warn!(owner = %owner_key, error = %e, "Enumeration failed");
            crate::metrics::record_tier("enumeration", "error");
            e
        })?;

        let total = records.len();
        let mut seen = HashSet::new();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|record| match record.validate_for_owner(owner_key) {
                Ok(()) => true,
                Err(e) => {
                    debug!(owner = %owner_key, error = %e, "Skipping enumerated record");
                    false
                }
            })
            .filter(|record| seen.insert(record.record_id.clone()))
            .collect();

        crate::metrics::record_tier("enumeration", if records.is_empty() { "empty" } else { "hit" });
        debug!(owner = %owner_key, total, kept = records.len(), "Enumeration complete");
        Ok(records)
    }
}
