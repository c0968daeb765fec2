//! Manifest transport abstraction
//!
//! [`ManifestProvider`](super::ManifestProvider) speaks to its origin
//! through the [`ManifestSource`] trait so the refresh state machine can be
//! exercised without a network. [`HttpManifestSource`] is the production
//! implementation; [`ScriptedManifestSource`] replays queued outcomes for
//! tests.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::ManifestError;
use crate::util::CancelToken;

/// Result of one conditional fetch
#[derive(Debug)]
pub enum FetchOutcome {
    /// The origin revalidated the caller's ETag; the body was not resent
    NotModified,
    /// A fresh document, with the ETag to present next time
    Fetched {
        body: String,
        etag: Option<String>,
    },
}

/// Where manifest documents come from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Performs one conditional fetch
    ///
    /// `etag` is the validator from the previous successful fetch, if any.
    async fn fetch(
        &self,
        etag: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, ManifestError>;
}

/// Fetches the manifest over HTTP with `If-None-Match` revalidation
pub struct HttpManifestSource {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestSource {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(
        &self,
        etag: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, ManifestError> {
        let mut request = self.client.get(&self.url).header(ACCEPT, "application/json");
        if let Some(tag) = etag {
            request = request.header(IF_NONE_MATCH, tag);
        }

        debug!(url = %self.url, revalidating = etag.is_some(), "fetching manifest");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ManifestError::Cancelled),
            response = request.send() => response?,
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let body = tokio::select! {
                    _ = cancel.cancelled() => return Err(ManifestError::Cancelled),
                    body = response.text() => body?,
                };
                Ok(FetchOutcome::Fetched { body, etag })
            }
            status => Err(ManifestError::Status(status.as_u16())),
        }
    }
}

/// Test double that replays queued outcomes and records observed ETags
///
/// Each call pops the front of the queue; an exhausted queue answers with
/// HTTP 599 so a test that under-provisions outcomes fails loudly instead
/// of hanging.
#[derive(Default)]
pub struct ScriptedManifestSource {
    outcomes: Mutex<VecDeque<Result<FetchOutcome, ManifestError>>>,
    seen_etags: Mutex<Vec<Option<String>>>,
    calls: AtomicUsize,
}

impl ScriptedManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome for the next unanswered fetch
    pub fn push(&self, outcome: Result<FetchOutcome, ManifestError>) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Convenience for queueing a fresh document
    pub fn push_document(&self, body: &str, etag: Option<&str>) {
        self.push(Ok(FetchOutcome::Fetched {
            body: body.to_string(),
            etag: etag.map(str::to_string),
        }));
    }

    /// Number of fetches answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// ETag presented on each fetch, in call order
    pub fn seen_etags(&self) -> Vec<Option<String>> {
        self.seen_etags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ManifestSource for ScriptedManifestSource {
    async fn fetch(
        &self,
        etag: Option<&str>,
        _cancel: &CancelToken,
    ) -> Result<FetchOutcome, ManifestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_etags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(etag.map(str::to_string));
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Err(ManifestError::Status(599)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_replays_in_order() {
        let source = ScriptedManifestSource::new();
        source.push_document("{}", Some("\"v1\""));
        source.push(Ok(FetchOutcome::NotModified));

        let cancel = CancelToken::new();
        let first = source.fetch(None, &cancel).await.unwrap();
        assert!(matches!(first, FetchOutcome::Fetched { .. }));

        let second = source.fetch(Some("\"v1\""), &cancel).await.unwrap();
        assert!(matches!(second, FetchOutcome::NotModified));

        assert_eq!(source.calls(), 2);
        assert_eq!(
            source.seen_etags(),
            vec![None, Some("\"v1\"".to_string())]
        );
    }

    #[tokio::test]
    async fn test_scripted_source_fails_when_exhausted() {
        let source = ScriptedManifestSource::new();
        let cancel = CancelToken::new();
        let result = source.fetch(None, &cancel).await;
        assert!(matches!(result, Err(ManifestError::Status(599))));
    }
}
