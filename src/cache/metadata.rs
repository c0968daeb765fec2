//! Cache metadata persisted as `cache.json` at the cache base
//!
//! One record per cached binary. Sizes and access times live here rather
//! than being re-derived from the filesystem, so budget math stays cheap
//! and survives clock-skewed copies of the cache directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use super::layout::CacheKey;
use super::CacheError;
use crate::util::fs::write_atomic;

/// One cached binary on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub package: String,
    pub version: String,
    pub rid: String,
    pub provider: String,
    /// Primary file name inside the entry directory
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Total bytes of the entry directory, dependencies included
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "cachedTime")]
    pub cached_at: DateTime<Utc>,
    #[serde(rename = "lastAccessTime")]
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.package, &self.version, &self.rid, &self.provider)
    }
}

/// The full metadata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl CacheMetadata {
    /// Loads metadata from `path`; a missing or corrupt file yields an empty
    /// document so the cache self-heals instead of refusing to start
    pub async fn load(path: &Path) -> Self {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "cache metadata unreadable, starting empty"
                );
                Self::default()
            }
        }
    }

    /// Writes the document atomically
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        let body = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &body)
            .await
            .map_err(|err| CacheError::io(path, err))
    }

    /// Sum of recorded entry sizes
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|entry| entry.size_bytes).sum()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(&key.storage_key())
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key().storage_key(), entry);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.remove(&key.storage_key())
    }

    /// Marks an entry as just used
    pub fn touch(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(&key.storage_key()) {
            entry.last_access = Utc::now();
        }
    }

    /// Entries ordered least recently used first; ties broken by the older
    /// cached time
    pub fn lru_order(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then(a.cached_at.cmp(&b.cached_at))
        });
        entries
    }
}
