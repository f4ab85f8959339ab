// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TTL classes for cached data.
//!
//! Two categories of data are cached with very different lifetimes:
//!
//! - **Short**: mutable ledger-backed data (ownership, balances, status).
//!   Minutes.
//! - **Long**: immutable content-addressed metadata (anything keyed by its own
//!   hash). Hours.
//!
//! Both share the same [`RecordCache`](crate::RecordCache) implementation; the
//! class only picks the expiry duration.
//!
//! # Example
//!
//! ```
//! use hybrid_resolver::{ResolverConfig, TtlClass};
//! use std::time::Duration;
//!
//! let config = ResolverConfig::default();
//! assert_eq!(TtlClass::Short.duration(&config), Duration::from_secs(5 * 60));
//! assert_eq!(TtlClass::Long.duration(&config), Duration::from_secs(24 * 60 * 60));
//! ```

use std::time::Duration;

use crate::config::ResolverConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Mutable ground-truth-backed data (default 5 minutes)
    Short,
    /// Immutable content-addressed metadata (default 24 hours)
    Long,
}

impl TtlClass {
    /// Resolve the configured duration for this class.
    #[must_use]
    pub fn duration(self, config: &ResolverConfig) -> Duration {
        match self {
            TtlClass::Short => Duration::from_secs(config.short_ttl_secs),
            TtlClass::Long => Duration::from_secs(config.long_ttl_secs),
        }
    }

    /// Short label used in logs and metric labels.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            TtlClass::Short => "short",
            TtlClass::Long => "long",
        }
    }
}

impl std::fmt::Display for TtlClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
