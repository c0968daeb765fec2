//! Streaming downloads with checksum verification
//!
//! [`BinaryFetcher`] is the transport seam: production uses [`HttpFetcher`]
//! over reqwest, tests use [`InMemoryFetcher`]. [`BinaryDownloader`] sits on
//! top and stages a manifest entry plus its dependencies into one directory,
//! verifying every file's SHA-256 before reporting success.

use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::manifest::RuntimeBinaryEntry;
use crate::transfer::progress::{ProgressHandler, TransferEvent};
use crate::util::CancelToken;

/// Errors from transferring and verifying binaries
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("checksum mismatch for {file_name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },

    #[error("no content available for {0}")]
    NotFound(String),

    #[error("download I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transport for fetching one manifest entry to a local file
///
/// Implementations write the body to `dest` and return the byte count.
/// Checksums are verified by the caller, not here.
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    async fn fetch(
        &self,
        entry: &RuntimeBinaryEntry,
        dest: &Path,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<u64, DownloadError>;
}

/// HTTP transport streaming the body chunk by chunk
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryFetcher for HttpFetcher {
    async fn fetch(
        &self,
        entry: &RuntimeBinaryEntry,
        dest: &Path,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<u64, DownloadError> {
        let url = entry.url.clone();
        let response = tokio::select! {
            result = self.client.get(&url).send() => {
                result.map_err(|source| DownloadError::Network { url: url.clone(), source })?
            }
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length().or(Some(entry.size_bytes));
        progress.on_event(TransferEvent::Started {
            file_name: entry.file_name.clone(),
            total_bytes,
        });

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| DownloadError::io(dest, err))?;
        let mut stream = response.bytes_stream();
        let mut transferred = 0u64;

        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|source| DownloadError::Network {
                url: url.clone(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|err| DownloadError::io(dest, err))?;
            transferred += chunk.len() as u64;
            progress.on_event(TransferEvent::Advanced {
                file_name: entry.file_name.clone(),
                transferred_bytes: transferred,
                total_bytes,
            });
        }

        file.flush()
            .await
            .map_err(|err| DownloadError::io(dest, err))?;
        progress.on_event(TransferEvent::Finished {
            file_name: entry.file_name.clone(),
            transferred_bytes: transferred,
        });
        debug!(url = %entry.url, bytes = transferred, "download complete");
        Ok(transferred)
    }
}

/// Transport serving bodies from memory, keyed by URL
///
/// The offline stand-in for [`HttpFetcher`] in tests.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body);
    }
}

#[async_trait]
impl BinaryFetcher for InMemoryFetcher {
    async fn fetch(
        &self,
        entry: &RuntimeBinaryEntry,
        dest: &Path,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<u64, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let body = self
            .bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry.url)
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(entry.url.clone()))?;

        progress.on_event(TransferEvent::Started {
            file_name: entry.file_name.clone(),
            total_bytes: Some(body.len() as u64),
        });
        tokio::fs::write(dest, &body)
            .await
            .map_err(|err| DownloadError::io(dest, err))?;
        progress.on_event(TransferEvent::Finished {
            file_name: entry.file_name.clone(),
            transferred_bytes: body.len() as u64,
        });
        Ok(body.len() as u64)
    }
}

/// A completed staging directory, ready for cache registration
#[derive(Debug, Clone)]
pub struct StagedDownload {
    pub dir: PathBuf,
    /// Primary file name, as named in the manifest entry
    pub file_name: String,
    /// Bytes actually written across every staged file
    pub total_bytes: u64,
    pub files: Vec<String>,
}

/// Stages a manifest entry and its dependency closure
pub struct BinaryDownloader {
    fetcher: Arc<dyn BinaryFetcher>,
}

impl BinaryDownloader {
    pub fn new(fetcher: Arc<dyn BinaryFetcher>) -> Self {
        Self { fetcher }
    }

    /// Downloads `entry` plus its dependencies into `staging_dir`
    ///
    /// Dependencies are file names resolved against `siblings`, the other
    /// entries published for the same version and rid. Each file is
    /// checksum-verified after download; any failure aborts the whole stage.
    /// A dependency with no matching sibling is logged and skipped.
    pub async fn stage(
        &self,
        entry: &RuntimeBinaryEntry,
        siblings: &[RuntimeBinaryEntry],
        staging_dir: &Path,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<StagedDownload, DownloadError> {
        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|err| DownloadError::io(staging_dir, err))?;

        let plan = resolve_closure(entry, siblings);
        let mut total_bytes = 0u64;
        let mut files = Vec::with_capacity(plan.len());

        for item in plan {
            let dest = staging_dir.join(&item.file_name);
            let bytes = self.fetcher.fetch(item, &dest, progress, cancel).await?;
            verify_checksum(&dest, &item.sha256, &item.file_name).await?;
            total_bytes += bytes;
            files.push(item.file_name.clone());
        }

        info!(
            file = %entry.file_name,
            files = files.len(),
            bytes = total_bytes,
            "staged runtime binary"
        );
        Ok(StagedDownload {
            dir: staging_dir.to_path_buf(),
            file_name: entry.file_name.clone(),
            total_bytes,
            files,
        })
    }
}

/// The entry followed by its transitive dependencies, deduplicated by file
/// name, in download order
fn resolve_closure<'a>(
    entry: &'a RuntimeBinaryEntry,
    siblings: &'a [RuntimeBinaryEntry],
) -> Vec<&'a RuntimeBinaryEntry> {
    let mut queue: Vec<&RuntimeBinaryEntry> = vec![entry];
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(entry.file_name.as_str());

    let mut index = 0;
    while index < queue.len() {
        let current = queue[index];
        index += 1;
        for dep_name in &current.dependencies {
            if !seen.insert(dep_name.as_str()) {
                continue;
            }
            match siblings.iter().find(|sibling| {
                sibling.file_name == *dep_name && sibling.rid.eq_ignore_ascii_case(&current.rid)
            }) {
                Some(dep) => queue.push(dep),
                None => {
                    warn!(
                        dependency = %dep_name,
                        rid = %current.rid,
                        "dependency not published for this rid, skipping"
                    );
                }
            }
        }
    }
    queue
}

/// SHA-256 of a file, streamed, as lowercase hex
pub async fn sha256_of(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies a staged file against its published checksum
///
/// An empty published checksum skips verification; the corrupt file is
/// deleted on mismatch so it cannot be retried into the cache.
async fn verify_checksum(
    path: &Path,
    expected: &str,
    file_name: &str,
) -> Result<(), DownloadError> {
    if expected.is_empty() {
        debug!(file = %file_name, "no checksum published, skipping verification");
        return Ok(());
    }
    let actual = sha256_of(path)
        .await
        .map_err(|err| DownloadError::io(path, err))?;
    if !actual.eq_ignore_ascii_case(expected) {
        let _ = tokio::fs::remove_file(path).await;
        return Err(DownloadError::ChecksumMismatch {
            file_name: file_name.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::progress::{CollectingProgress, NoOpProgress};

    fn digest(body: &[u8]) -> String {
        hex::encode(Sha256::digest(body))
    }

    fn entry(url: &str, file_name: &str, sha256: &str, deps: &[&str]) -> RuntimeBinaryEntry {
        RuntimeBinaryEntry {
            rid: "linux-x64".to_string(),
            provider: "cpu".to_string(),
            url: url.to_string(),
            file_name: file_name.to_string(),
            size_bytes: 0,
            sha256: sha256.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_stage_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let body = b"runtime bytes".to_vec();
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("mem://lib.so", body.clone());

        let downloader = BinaryDownloader::new(Arc::new(fetcher));
        let main = entry("mem://lib.so", "lib.so", &digest(&body), &[]);
        let progress = CollectingProgress::new();

        let staged = downloader
            .stage(&main, &[], tmp.path(), &progress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(staged.file_name, "lib.so");
        assert_eq!(staged.total_bytes, body.len() as u64);
        assert_eq!(staged.files, vec!["lib.so"]);
        assert_eq!(tokio::fs::read(tmp.path().join("lib.so")).await.unwrap(), body);
        assert!(matches!(
            progress.events().first(),
            Some(TransferEvent::Started { .. })
        ));
    }

    #[tokio::test]
    async fn test_stage_pulls_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let main_body = b"main".to_vec();
        let dep_body = b"dep".to_vec();
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("mem://main.so", main_body.clone());
        fetcher.insert("mem://dep.so", dep_body.clone());

        let main = entry("mem://main.so", "main.so", &digest(&main_body), &["dep.so"]);
        let dep = entry("mem://dep.so", "dep.so", &digest(&dep_body), &[]);

        let downloader = BinaryDownloader::new(Arc::new(fetcher));
        let staged = downloader
            .stage(
                &main,
                &[main.clone(), dep],
                tmp.path(),
                &NoOpProgress,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(staged.files, vec!["main.so", "dep.so"]);
        assert_eq!(staged.total_bytes, 7);
        assert!(tmp.path().join("dep.so").exists());
    }

    #[tokio::test]
    async fn test_missing_dependency_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let body = b"main".to_vec();
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("mem://main.so", body.clone());

        let main = entry("mem://main.so", "main.so", &digest(&body), &["ghost.so"]);
        let downloader = BinaryDownloader::new(Arc::new(fetcher));
        let staged = downloader
            .stage(&main, &[], tmp.path(), &NoOpProgress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(staged.files, vec!["main.so"]);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_and_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("mem://lib.so", b"actual bytes".to_vec());

        let main = entry("mem://lib.so", "lib.so", &digest(b"expected bytes"), &[]);
        let downloader = BinaryDownloader::new(Arc::new(fetcher));
        let err = downloader
            .stage(&main, &[], tmp.path(), &NoOpProgress, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
        assert!(!tmp.path().join("lib.so").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("mem://lib.so", b"bytes".to_vec());

        let cancel = CancelToken::new();
        cancel.cancel();

        let main = entry("mem://lib.so", "lib.so", "", &[]);
        let downloader = BinaryDownloader::new(Arc::new(fetcher));
        let err = downloader
            .stage(&main, &[], tmp.path(), &NoOpProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = BinaryDownloader::new(Arc::new(InMemoryFetcher::new()));
        let main = entry("mem://nowhere.so", "nowhere.so", "", &[]);
        let err = downloader
            .stage(&main, &[], tmp.path(), &NoOpProgress, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(_)));
    }
}
