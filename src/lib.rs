//! modelyard - resource-aware runtime and model cache for local inference
//!
//! This library keeps local ML inference supplied with the right native
//! runtime and keeps model loads inside the machine's memory. It detects
//! the host platform and GPUs, resolves the best execution provider,
//! downloads runtime binaries from a hosted manifest into a size-bounded
//! disk cache, and admits models into a memory-budgeted pool.
//!
//! # Core Concepts
//!
//! - **Execution Provider**: The acceleration backend a runtime binary
//!   targets (CUDA, DirectML, CoreML, or plain CPU). `Auto` resolves to
//!   the best one the host supports.
//! - **Runtime Manifest**: A hosted JSON document mapping packages and
//!   versions to downloadable binaries per platform and provider, cached
//!   with a freshness window and layered fallbacks.
//! - **Binary Cache**: A disk store under the user cache directory with
//!   a byte budget, evicting least recently used entries.
//! - **Model Pool**: In-memory registry of loaded models that admits new
//!   loads only when the estimate plus a safety margin fits the budget.
//!
//! # Example Usage
//!
//! ```ignore
//! use modelyard::{ModelRuntime, YardConfig};
//! use modelyard::transfer::NoOpProgress;
//! use modelyard::util::CancelToken;
//!
//! async fn prepare() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = ModelRuntime::new(YardConfig::default()).await?;
//!
//!     println!("provider: {}", runtime.resolve_provider());
//!
//!     let path = runtime
//!         .ensure_binary("onnxruntime", None, &NoOpProgress, &CancelToken::new())
//!         .await?;
//!     println!("runtime binary at {}", path.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`detect`]: Platform, GPU, and memory detection
//! - [`provider`]: Execution provider resolution
//! - [`manifest`]: Manifest schema, sources, and the caching provider
//! - [`cache`]: Size-bounded binary cache on disk
//! - [`transfer`]: Checksum-verified downloads with progress events
//! - [`memory`]: Pure model memory estimation
//! - [`pool`]: Memory-budgeted model pool
//! - [`runtime`]: The facade tying everything together

// Public modules
pub mod cache;
pub mod cli;
pub mod config;
pub mod detect;
pub mod manifest;
pub mod memory;
pub mod pool;
pub mod provider;
pub mod runtime;
pub mod transfer;
pub mod util;

// Re-export key types for convenient access
pub use cache::{BinaryCache, CacheError, CacheKey};
pub use config::{ConfigError, YardConfig};
pub use detect::{GpuInfo, PlatformInfo, SystemDetector, SystemMemory};
pub use manifest::{ManifestError, ManifestProvider, RuntimeManifest};
pub use memory::{MemoryEstimate, ModelMemoryConfig, Quantization};
pub use pool::{LoadedModel, ModelLoader, ModelPool, PoolError};
pub use provider::{ExecutionProvider, ProviderResolver};
pub use runtime::{ModelRuntime, RuntimeError};
pub use util::{init_default, init_from_env, init_logging, CancelToken, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_modelyard() {
        assert_eq!(NAME, "modelyard");
    }
}
