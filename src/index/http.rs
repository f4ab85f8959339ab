// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP client for a remote index service.
//!
//! - `GET {base}/owner-index/{owner}` → JSON array of [`IndexEntry`]
//!   (404 means "nothing indexed")
//! - `PUT {base}/owner-index/{owner}/{record_id}` with the entry as JSON body

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use super::RecordIndex;
use crate::ledger::RemoteError;
use crate::record::IndexEntry;

pub struct HttpRecordIndex {
    client: Client,
    base: Url,
}

fn request_err(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() || e.is_connect() {
        RemoteError::call("NETWORK_ERROR", e.to_string())
    } else if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::transient(e.to_string())
    }
}

/// Map a non-success status. Throttling and server errors are retryable.
fn status_err(status: StatusCode, context: &str) -> RemoteError {
    let message = format!("{} returned {}", context, status);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RemoteError::call(status.as_u16().to_string(), message)
    } else {
        RemoteError::Fatal(message)
    }
}

impl HttpRecordIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Fatal(format!("invalid index url '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Fatal(format!("index url '{}' cannot be a base", base_url)));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Fatal(e.to_string()))?;
        Ok(Self { client, base })
    }

    /// `{base}/owner-index/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Fatal(format!("index url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .push("owner-index")
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl RecordIndex for HttpRecordIndex {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn lookup(&self, owner_key: &str) -> Result<Vec<IndexEntry>, RemoteError> {
        let url = self.endpoint(&[owner_key])?;
        let response = self.client.get(url).send().await.map_err(request_err)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(status_err(status, "index lookup"));
        }

        let mut entries: Vec<IndexEntry> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        for entry in entries.iter_mut() {
            if entry.owner_key.is_empty() {
                entry.owner_key = owner_key.to_string();
            }
        }
        Ok(entries)
    }

    async fn publish(&self, entry: &IndexEntry) -> Result<(), RemoteError> {
        let url = self.endpoint(&[&entry.owner_key, &entry.record_id])?;
        let response = self
            .client
            .put(url)
            .json(entry)
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_err(status, "index publish"))
        }
    }
}
