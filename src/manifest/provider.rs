//! Cached manifest retrieval with layered fallbacks
//!
//! `get` works through five layers and returns the first that produces a
//! document:
//!
//! 1. the in-memory copy, when younger than the TTL
//! 2. a conditional fetch from the source (`If-None-Match` when an ETag is
//!    known); 304 revalidates the in-memory copy without reparsing or
//!    rewriting the disk snapshot, 200 replaces memory, snapshot, and ETag
//! 3. the on-disk snapshot from a previous run
//! 4. a stale in-memory copy
//! 5. the embedded default baked into the binary
//!
//! Network and status failures are soft: logged, then the chain continues.
//! The one hard error is a fresh 200 body that fails to parse.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::schema::{self, RuntimeBinaryEntry, RuntimeManifest};
use super::source::{FetchOutcome, ManifestSource};
use super::ManifestError;
use crate::util::fs::write_atomic;
use crate::util::CancelToken;

const SNAPSHOT_FILE: &str = "manifest.json";
const ETAG_FILE: &str = "manifest.etag";

/// Manifest shipped in the binary; keeps the runtime operable with no
/// network and no prior snapshot
const EMBEDDED_MANIFEST_JSON: &str = r#"{
    "version": "1.0",
    "updated": "2025-05-20T00:00:00Z",
    "packages": {
        "onnxruntime": {
            "description": "ONNX Runtime native libraries",
            "homepage": "https://onnxruntime.ai",
            "versions": {
                "1.17.3": {
                    "released": "2025-04-10T00:00:00Z",
                    "binaries": [
                        {
                            "rid": "linux-x64",
                            "provider": "cpu",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/linux-x64/cpu/libonnxruntime.so.1.17.3",
                            "fileName": "libonnxruntime.so.1.17.3",
                            "size": 17825792,
                            "sha256": "8c4f6a0d9e2b71c5530a8f47d1e6b92c04a7f30e5d8c16b9a2f407c3e5d190ab"
                        },
                        {
                            "rid": "linux-x64",
                            "provider": "cuda",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/linux-x64/cuda/libonnxruntime.so.1.17.3",
                            "fileName": "libonnxruntime.so.1.17.3",
                            "size": 254803968,
                            "sha256": "3b9d7e21c4a6f80e195c2d7b64a0e8f3172c5b9d04e6a8c1f30b7d5e92a4c618",
                            "dependencies": ["libonnxruntime_providers_shared.so"]
                        },
                        {
                            "rid": "linux-x64",
                            "provider": "cpu",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/linux-x64/cpu/libonnxruntime_providers_shared.so",
                            "fileName": "libonnxruntime_providers_shared.so",
                            "size": 131072,
                            "sha256": "f20a8c35d7e491b60c3f5a28d94e71b052a8c6e3f10d79b4285c0e6a3d91f7b4"
                        },
                        {
                            "rid": "win-x64",
                            "provider": "cpu",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/win-x64/cpu/onnxruntime.dll",
                            "fileName": "onnxruntime.dll",
                            "size": 16777216,
                            "sha256": "6e1c9a47f30b82d5a94c60e7f21d8b3c570e9a14f6d20c8b3e5a79d1042f6c8e"
                        },
                        {
                            "rid": "win-x64",
                            "provider": "directml",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/win-x64/directml/onnxruntime.dll",
                            "fileName": "onnxruntime.dll",
                            "size": 19922944,
                            "sha256": "a57d20c8b4f91e36d02a75c3e8f64b19287d5c0a3f9e61b48d2c07e5a93f1b60"
                        },
                        {
                            "rid": "osx-arm64",
                            "provider": "coreml",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/osx-arm64/coreml/libonnxruntime.1.17.3.dylib",
                            "fileName": "libonnxruntime.1.17.3.dylib",
                            "size": 15728640,
                            "sha256": "19e6b3d07c5a82f4e61d90b27a4f38c5d0b69e21a7c4f58392e0d6b1c8a5f473"
                        },
                        {
                            "rid": "osx-arm64",
                            "provider": "cpu",
                            "url": "https://runtimes.modelyard.dev/onnxruntime/1.17.3/osx-arm64/cpu/libonnxruntime.1.17.3.dylib",
                            "fileName": "libonnxruntime.1.17.3.dylib",
                            "size": 14680064,
                            "sha256": "d4b82f60a19c57e3b06d42a8f75c19e08354a7d2c6b90f1e5d38a62c04b97fe1"
                        }
                    ]
                }
            }
        }
    }
}"#;

/// The embedded fallback document
pub(crate) fn embedded_default() -> RuntimeManifest {
    schema::parse(EMBEDDED_MANIFEST_JSON).expect("embedded manifest is valid JSON")
}

struct ProviderState {
    manifest: Option<Arc<RuntimeManifest>>,
    etag: Option<String>,
    /// When the in-memory copy was last confirmed fresh against the source
    fetched_at: Option<Instant>,
    /// Whether the persisted ETag has been read this process
    etag_loaded: bool,
}

/// Serves the current runtime manifest; see the module docs for the chain
pub struct ManifestProvider {
    source: Arc<dyn ManifestSource>,
    snapshot_path: PathBuf,
    etag_path: PathBuf,
    ttl: Duration,
    state: Mutex<ProviderState>,
}

impl ManifestProvider {
    /// `base_dir` is the cache base; the snapshot lives under
    /// `{base_dir}/manifest/`
    pub fn new(source: Arc<dyn ManifestSource>, base_dir: &Path, ttl: Duration) -> Self {
        let manifest_dir = base_dir.join("manifest");
        Self {
            source,
            snapshot_path: manifest_dir.join(SNAPSHOT_FILE),
            etag_path: manifest_dir.join(ETAG_FILE),
            ttl,
            state: Mutex::new(ProviderState {
                manifest: None,
                etag: None,
                fetched_at: None,
                etag_loaded: false,
            }),
        }
    }

    /// Returns a current manifest, honoring the TTL
    pub async fn get(&self, cancel: &CancelToken) -> Result<Arc<RuntimeManifest>, ManifestError> {
        self.get_with(false, cancel).await
    }

    /// Bypasses the TTL and revalidates against the source now
    pub async fn refresh(
        &self,
        cancel: &CancelToken,
    ) -> Result<Arc<RuntimeManifest>, ManifestError> {
        self.get_with(true, cancel).await
    }

    /// The binary published for an exact package/version/rid/provider tuple
    pub async fn get_binary(
        &self,
        package: &str,
        version: &str,
        rid: &str,
        provider: &str,
        cancel: &CancelToken,
    ) -> Result<Option<RuntimeBinaryEntry>, ManifestError> {
        let manifest = self.get(cancel).await?;
        Ok(manifest.get_binary(package, version, rid, provider).cloned())
    }

    /// The newest published binary for a package on rid/provider
    pub async fn get_latest_binary(
        &self,
        package: &str,
        rid: &str,
        provider: &str,
        cancel: &CancelToken,
    ) -> Result<Option<(String, RuntimeBinaryEntry)>, ManifestError> {
        let manifest = self.get(cancel).await?;
        Ok(manifest
            .get_latest_binary(package, rid, provider)
            .map(|(version, entry)| (version.to_string(), entry.clone())))
    }

    async fn get_with(
        &self,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<Arc<RuntimeManifest>, ManifestError> {
        let mut state = self.state.lock().await;

        if !force {
            if let (Some(manifest), Some(at)) = (&state.manifest, state.fetched_at) {
                if at.elapsed() < self.ttl {
                    return Ok(manifest.clone());
                }
            }
        }

        if !state.etag_loaded {
            state.etag = self.load_etag().await;
            state.etag_loaded = true;
        }

        match self.source.fetch(state.etag.as_deref(), cancel).await {
            Ok(FetchOutcome::NotModified) => {
                if let Some(manifest) = state.manifest.clone() {
                    debug!("manifest unchanged (304), reusing parsed copy");
                    state.fetched_at = Some(Instant::now());
                    return Ok(manifest);
                }
                // Cold start revalidated against the persisted snapshot.
                if let Some(manifest) = self.load_snapshot().await {
                    let manifest = Arc::new(manifest);
                    state.manifest = Some(manifest.clone());
                    state.fetched_at = Some(Instant::now());
                    return Ok(manifest);
                }
                warn!("origin revalidated an ETag but no snapshot exists locally");
            }
            Ok(FetchOutcome::Fetched { body, etag }) => {
                // A fresh 200 that does not parse is the one hard failure.
                let manifest = Arc::new(schema::parse(&body)?);
                self.persist(&body, etag.as_deref()).await;
                info!(
                    packages = manifest.packages.len(),
                    "manifest refreshed from source"
                );
                state.manifest = Some(manifest.clone());
                state.etag = etag;
                state.fetched_at = Some(Instant::now());
                return Ok(manifest);
            }
            Err(err) => {
                warn!(error = %err, "manifest fetch failed, using fallbacks");
            }
        }

        if state.manifest.is_none() {
            if let Some(manifest) = self.load_snapshot().await {
                debug!("serving manifest from disk snapshot");
                let manifest = Arc::new(manifest);
                // Not validated against the source; leave it stale so the
                // next get retries the network.
                state.manifest = Some(manifest.clone());
                return Ok(manifest);
            }
        }

        if let Some(manifest) = &state.manifest {
            debug!("serving stale in-memory manifest");
            return Ok(manifest.clone());
        }

        warn!("serving embedded default manifest");
        let manifest = Arc::new(embedded_default());
        state.manifest = Some(manifest.clone());
        Ok(manifest)
    }

    async fn load_etag(&self) -> Option<String> {
        let raw = tokio::fs::read_to_string(&self.etag_path).await.ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    async fn load_snapshot(&self) -> Option<RuntimeManifest> {
        let raw = tokio::fs::read_to_string(&self.snapshot_path).await.ok()?;
        match schema::parse(&raw) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                warn!(
                    path = %self.snapshot_path.display(),
                    error = %err,
                    "discarding corrupt manifest snapshot"
                );
                None
            }
        }
    }

    /// Best-effort persistence; the in-memory copy is already current
    async fn persist(&self, body: &str, etag: Option<&str>) {
        if let Err(err) = write_atomic(&self.snapshot_path, body.as_bytes()).await {
            warn!(error = %err, "failed to persist manifest snapshot");
            return;
        }
        match etag {
            Some(tag) => {
                if let Err(err) = write_atomic(&self.etag_path, tag.as_bytes()).await {
                    warn!(error = %err, "failed to persist manifest ETag");
                }
            }
            None => {
                let _ = tokio::fs::remove_file(&self.etag_path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_parses() {
        let manifest = embedded_default();
        assert!(manifest.package("onnxruntime").is_some());
        assert!(manifest
            .get_binary("onnxruntime", "1.17.3", "linux-x64", "cpu")
            .is_some());
    }

    #[test]
    fn test_embedded_default_entries_are_complete() {
        let manifest = embedded_default();
        for (_, package) in &manifest.packages {
            for (_, version) in &package.versions {
                for entry in &version.binaries {
                    assert!(!entry.url.is_empty());
                    assert_eq!(entry.sha256.len(), 64);
                    assert!(entry.size_bytes > 0);
                }
            }
        }
    }

    #[test]
    fn test_paths_derive_from_base_dir() {
        let source = Arc::new(super::super::source::ScriptedManifestSource::new());
        let provider = ManifestProvider::new(source, Path::new("/tmp/yard"), Duration::from_secs(1));
        assert_eq!(
            provider.snapshot_path,
            PathBuf::from("/tmp/yard/manifest/manifest.json")
        );
        assert_eq!(
            provider.etag_path,
            PathBuf::from("/tmp/yard/manifest/manifest.etag")
        );
    }
}
