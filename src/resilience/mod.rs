// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience primitives for remote calls.
//!
//! - [`retry`]: classification-aware exponential backoff around one call
//! - [`batch`]: bounded-concurrency batches of independent calls

pub mod retry;
pub mod batch;
