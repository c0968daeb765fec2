//! The runtime facade
//!
//! [`ModelRuntime`] wires the detector, provider resolver, manifest
//! provider, binary cache, downloader, and model pool into one entry point.
//! Library callers construct it once and hold it for the process lifetime;
//! the CLI builds one per invocation.
//!
//! # Example
//!
//! ```no_run
//! use modelyard::{ModelRuntime, YardConfig};
//! use modelyard::transfer::NoOpProgress;
//! use modelyard::util::CancelToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = ModelRuntime::new(YardConfig::default()).await?;
//! let provider = runtime.resolve_provider();
//! let path = runtime
//!     .ensure_binary("onnxruntime", None, &NoOpProgress, &CancelToken::new())
//!     .await?;
//! println!("{provider}: {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{self, layout, BinaryCache, CacheError, CacheKey};
use crate::config::{ConfigError, YardConfig};
use crate::detect::SystemDetector;
use crate::manifest::{
    HttpManifestSource, ManifestError, ManifestProvider, ManifestSource, RuntimeManifest,
};
use crate::memory::{self, MemoryEstimate, ModelMemoryConfig};
use crate::pool::{LoadedModel, ModelLoader, ModelPool, PoolError, PoolStatus};
use crate::provider::{ExecutionProvider, ProviderResolver};
use crate::transfer::{BinaryDownloader, BinaryFetcher, DownloadError, HttpFetcher, ProgressHandler};
use crate::util::format_bytes;
use crate::util::CancelToken;

/// Errors surfaced by the runtime facade
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("no binary published for {package} {version} on {rid} with provider {provider}")]
    BinaryUnavailable {
        package: String,
        version: String,
        rid: String,
        provider: String,
    },

    #[error("cached binary missing at {path} after registration")]
    BinaryMissing { path: PathBuf },
}

/// Resource-aware runtime for local inference
pub struct ModelRuntime {
    config: YardConfig,
    detector: Arc<SystemDetector>,
    resolver: ProviderResolver,
    manifest: ManifestProvider,
    cache: BinaryCache,
    downloader: BinaryDownloader,
    pool: ModelPool,
}

impl ModelRuntime {
    /// Builds the runtime with HTTP collaborators from configuration
    pub async fn new(config: YardConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        let source = Arc::new(HttpManifestSource::new(
            client.clone(),
            config.manifest_url.clone(),
        ));
        let fetcher = Arc::new(HttpFetcher::new(client));
        Self::with_sources(config, source, fetcher).await
    }

    /// Builds the runtime with injected manifest and transfer transports
    ///
    /// This is the seam tests use to run the full stack offline.
    pub async fn with_sources(
        config: YardConfig,
        source: Arc<dyn ManifestSource>,
        fetcher: Arc<dyn BinaryFetcher>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let base_dir = cache::resolve_base_dir(config.cache_dir.as_deref())?;
        let detector = Arc::new(SystemDetector::new());
        let resolver = ProviderResolver::new(detector.clone());
        let manifest = ManifestProvider::new(source, &base_dir, config.manifest_ttl());
        let cache = BinaryCache::open(&base_dir, config.max_cache_bytes).await?;
        let downloader = BinaryDownloader::new(fetcher);

        let pool_budget = match config.pool_budget_bytes {
            Some(budget) => budget,
            None => default_pool_budget(&detector),
        };
        let pool = ModelPool::new(pool_budget, config.safety_margin);

        info!(
            base_dir = %base_dir.display(),
            cache_budget = %format_bytes(config.max_cache_bytes),
            pool_budget = %format_bytes(pool_budget),
            "modelyard runtime ready"
        );
        Ok(Self {
            config,
            detector,
            resolver,
            manifest,
            cache,
            downloader,
            pool,
        })
    }

    pub fn config(&self) -> &YardConfig {
        &self.config
    }

    pub fn detector(&self) -> &SystemDetector {
        &self.detector
    }

    pub fn manifest(&self) -> &ManifestProvider {
        &self.manifest
    }

    pub fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    /// Resolves the configured provider preference against the hardware
    pub fn resolve_provider(&self) -> ExecutionProvider {
        self.resolver.resolve(self.config.preferred_provider)
    }

    /// Providers usable on this host, best first
    pub fn available_providers(&self) -> Vec<ExecutionProvider> {
        self.resolver.available()
    }

    /// Ensures the runtime binary for `package` is cached locally and
    /// returns its path
    ///
    /// `version: None` selects the newest published version for this host.
    /// The binary variant is chosen by the resolved execution provider; its
    /// dependencies are staged and verified alongside it before the cache
    /// registers anything.
    pub async fn ensure_binary(
        &self,
        package: &str,
        version: Option<&str>,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<PathBuf, RuntimeError> {
        let rid = self.detector.platform().rid.clone();
        let provider = self.resolve_provider();

        // An exact version can hit the cache without touching the manifest.
        if let Some(version) = version {
            let key = CacheKey::new(package, version, &rid, provider.as_str());
            if let Some(path) = self.cache.cached_path(&key).await? {
                debug!(key = %key, "binary cache hit");
                return Ok(path);
            }
        }

        let manifest = self.manifest.get(cancel).await?;
        let (version, entry) = match version {
            Some(version) => {
                let entry = manifest
                    .get_binary(package, version, &rid, provider.as_str())
                    .cloned()
                    .ok_or_else(|| RuntimeError::BinaryUnavailable {
                        package: package.to_string(),
                        version: version.to_string(),
                        rid: rid.clone(),
                        provider: provider.to_string(),
                    })?;
                (version.to_string(), entry)
            }
            None => manifest
                .get_latest_binary(package, &rid, provider.as_str())
                .map(|(version, entry)| (version.to_string(), entry.clone()))
                .ok_or_else(|| RuntimeError::BinaryUnavailable {
                    package: package.to_string(),
                    version: "latest".to_string(),
                    rid: rid.clone(),
                    provider: provider.to_string(),
                })?,
        };
        let siblings = manifest.version_binaries(package, &version).to_vec();

        let key = CacheKey::new(package, &version, &rid, provider.as_str());
        if let Some(path) = self.cache.cached_path(&key).await? {
            debug!(key = %key, "binary cache hit");
            return Ok(path);
        }

        let staging =
            layout::staging_root(self.cache.base_dir()).join(Uuid::new_v4().to_string());
        let staged = match self
            .downloader
            .stage(&entry, &siblings, &staging, progress, cancel)
            .await
        {
            Ok(staged) => staged,
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(err.into());
            }
        };

        let registered = self.cache.register(&key, &staged.dir, &staged.file_name).await;
        if registered.is_err() {
            let _ = tokio::fs::remove_dir_all(&staging).await;
        }
        let path = registered?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RuntimeError::BinaryMissing { path });
        }
        Ok(path)
    }

    /// Shorthand for [`ensure_binary`](Self::ensure_binary) with the newest
    /// published version
    pub async fn ensure_latest_binary(
        &self,
        package: &str,
        progress: &dyn ProgressHandler,
        cancel: &CancelToken,
    ) -> Result<PathBuf, RuntimeError> {
        self.ensure_binary(package, None, progress, cancel).await
    }

    /// Forces a manifest revalidation, bypassing the TTL
    pub async fn refresh_manifest(
        &self,
        cancel: &CancelToken,
    ) -> Result<Arc<RuntimeManifest>, RuntimeError> {
        Ok(self.manifest.refresh(cancel).await?)
    }

    /// Pure memory estimate for a model shape
    pub fn estimate(&self, config: &ModelMemoryConfig) -> MemoryEstimate {
        memory::estimate(config)
    }

    /// Whether a model of this shape would fit the pool's free budget now,
    /// with the configured safety margin
    pub fn can_fit(&self, config: &ModelMemoryConfig) -> bool {
        let usage = memory::estimate(config);
        let available = self
            .pool
            .budget_bytes()
            .saturating_sub(self.pool.allocated_bytes());
        memory::can_fit(&usage, available, self.config.safety_margin)
    }

    /// Returns the resident model or loads it through `loader`
    pub async fn get_or_load(
        &self,
        model_id: &str,
        config: &ModelMemoryConfig,
        loader: &dyn ModelLoader,
    ) -> Result<Arc<dyn LoadedModel>, RuntimeError> {
        Ok(self.pool.get_or_load(model_id, config, loader).await?)
    }

    pub fn unload(&self, model_id: &str) -> Result<(), RuntimeError> {
        Ok(self.pool.unload(model_id)?)
    }

    pub fn unload_all(&self) {
        self.pool.unload_all();
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }
}

/// Pool budget when none is configured: GPU memory capped by system memory,
/// or system memory alone on hosts without a discrete GPU
fn default_pool_budget(detector: &SystemDetector) -> u64 {
    let system = detector.memory();
    match detector.primary_gpu().total_memory_bytes {
        Some(gpu_bytes) if gpu_bytes > 0 => gpu_bytes.min(system.total_bytes),
        _ => system.total_bytes,
    }
}
