// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ground-truth call contracts.
//!
//! The ledger itself is opaque: implementors wrap whatever RPC client the
//! application uses and map its failures onto [`RemoteError`] so the retry
//! executor can classify them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{now_millis, Record};
use crate::resilience::retry::Retryable;

/// Failure of a remote call (ledger or index).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network blips, rate limiting, endpoint-specific transient codes.
    /// Whether it is actually retried is up to the policy's classifier.
    #[error("remote call failed{}: {message}", code_suffix(.code))]
    Call {
        code: Option<String>,
        message: String,
    },
    /// Nothing exists at the requested id. Never retried.
    #[error("not found: {0}")]
    NotFound(String),
    /// Permanently invalid request. Never retried.
    #[error("fatal remote error: {0}")]
    Fatal(String),
    /// The response could not be decoded into the record schema. Never retried.
    #[error("invalid remote response: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default()
}

impl RemoteError {
    /// Shorthand for a coded call failure.
    pub fn call(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Shorthand for an uncoded call failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Call {
            code: None,
            message: message.into(),
        }
    }
}

impl Retryable for RemoteError {
    fn error_code(&self) -> Option<String> {
        match self {
            Self::Call { code, .. } => code.clone(),
            _ => None,
        }
    }

    fn is_permanent(&self) -> bool {
        !matches!(self, Self::Call { .. })
    }
}

/// The authoritative record source.
#[async_trait]
pub trait GroundTruth: Send + Sync {
    /// Fetch one record by id. `Ok(None)` when the id does not exist.
    async fn get_record(&self, record_id: &str) -> Result<Option<Record>, RemoteError>;

    /// Enumerate every record currently held by `owner_key` (e.g. by
    /// scanning historical mutation logs). Much more expensive than
    /// [`get_record`](Self::get_record).
    async fn enumerate_by_owner(&self, owner_key: &str) -> Result<Vec<Record>, RemoteError>;
}

/// A submitted mutation awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub id: String,
    /// Epoch millis
    pub submitted_at: i64,
}

impl TransactionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            submitted_at: now_millis(),
        }
    }
}

/// How a receipt was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOrigin {
    /// The remote system's own wait-for-inclusion primitive
    Native,
    /// Explicit receipt polling after the native wait stalled
    Poll,
}

/// Proof that a mutation became durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_id: String,
    pub block_number: u64,
    /// Whether the mutation executed successfully once included
    pub success: bool,
    pub observed_via: ReceiptOrigin,
}

/// Receipt lookups used by the confirmation waiter.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Native "wait for inclusion". May hang on degraded endpoints.
    async fn wait_for_inclusion(&self, handle: &TransactionHandle) -> Result<Receipt, RemoteError>;

    /// One-shot receipt query. `Ok(None)` while the mutation is pending.
    async fn get_receipt(&self, transaction_id: &str) -> Result<Option<Receipt>, RemoteError>;
}
