//! Cache directory resolution and on-disk layout
//!
//! Resolution order for the base directory:
//!
//! 1. an explicit directory from configuration, used as-is
//! 2. `HF_HUB_CACHE`
//! 3. `HF_HOME`
//! 4. `XDG_CACHE_HOME`
//! 5. the platform cache directory (`~/.cache` on Linux)
//!
//! Environment-derived directories get a `modelyard` subdirectory appended so
//! the cache coexists with whatever else lives there.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::CacheError;

/// Default cache budget: 10 GiB
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Subdirectory appended to shared cache roots
const VENDOR_SUBDIR: &str = "modelyard";

/// Directory holding cached binaries under the base
const BINARIES_SUBDIR: &str = "binaries";

/// Directory for in-flight downloads under the base
const STAGING_SUBDIR: &str = "staging";

/// Resolves the cache base directory
pub fn resolve_base_dir(explicit: Option<&Path>) -> Result<PathBuf, CacheError> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    for name in ["HF_HUB_CACHE", "HF_HOME", "XDG_CACHE_HOME"] {
        if let Some(dir) = env_dir(name) {
            return Ok(dir.join(VENDOR_SUBDIR));
        }
    }
    dirs::cache_dir()
        .map(|dir| dir.join(VENDOR_SUBDIR))
        .ok_or(CacheError::NoCacheDir)
}

fn env_dir(name: &str) -> Option<PathBuf> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

/// Where cached binaries live under a base directory
pub fn binaries_root(base: &Path) -> PathBuf {
    base.join(BINARIES_SUBDIR)
}

/// Where in-flight downloads are staged under a base directory
pub fn staging_root(base: &Path) -> PathBuf {
    base.join(STAGING_SUBDIR)
}

/// Identity of one cached binary
///
/// Components are lowercased on construction, so two keys differing only in
/// case address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub package: String,
    pub version: String,
    pub rid: String,
    pub provider: String,
}

impl CacheKey {
    pub fn new(package: &str, version: &str, rid: &str, provider: &str) -> Self {
        Self {
            package: package.to_lowercase(),
            version: version.to_lowercase(),
            rid: rid.to_lowercase(),
            provider: provider.to_lowercase(),
        }
    }

    /// Stable key used in the metadata map
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.package, self.version, self.rid, self.provider
        )
    }

    /// Entry directory relative to the binaries root
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.package)
            .join(&self.version)
            .join(&self.rid)
            .join(&self.provider)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}/{})",
            self.package, self.version, self.rid, self.provider
        )
    }
}
