// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache storage backends.
//!
//! - [`sql`]: durable store on the sqlx `Any` driver (sqlite or mysql)
//! - [`memory`]: in-process key-value store, always available
//!
//! Backends are selected and combined by [`RecordCache`](crate::RecordCache).

pub mod traits;
pub mod memory;
pub mod sql;
