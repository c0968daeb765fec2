//! Disk cache for runtime binaries
//!
//! Binaries live under `{base}/binaries/{package}/{version}/{rid}/{provider}/`
//! with a single `cache.json` metadata file at the base recording sizes and
//! access times. Total size is bounded; admission past the budget evicts the
//! least recently used entries first.
//!
//! The base directory is resolved from the environment so the cache can sit
//! alongside other model caches on the machine (see [`resolve_base_dir`]).

pub mod layout;
pub mod metadata;
pub mod store;

pub use layout::{resolve_base_dir, CacheKey, DEFAULT_MAX_CACHE_BYTES};
pub use metadata::{CacheEntry, CacheMetadata};
pub use store::{BinaryCache, CacheStats};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from cache resolution and storage
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("no cache directory could be determined; set MODELYARD_CACHE_DIR")]
    NoCacheDir,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
