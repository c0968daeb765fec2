//! The LRU-bounded binary store
//!
//! All mutation goes through one async mutex over the metadata document, so
//! size accounting and the files on disk cannot race each other within a
//! process. Every mutation persists `cache.json` before returning.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::layout::{self, CacheKey};
use super::metadata::{CacheEntry, CacheMetadata};
use super::CacheError;

const METADATA_FILE: &str = "cache.json";

/// Point-in-time view of cache occupancy
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub base_dir: PathBuf,
}

/// Disk store for runtime binaries, bounded by a byte budget
pub struct BinaryCache {
    base_dir: PathBuf,
    binaries_dir: PathBuf,
    metadata_path: PathBuf,
    max_bytes: u64,
    state: Mutex<CacheMetadata>,
}

impl BinaryCache {
    /// Opens (creating if needed) the cache rooted at `base_dir`
    pub async fn open(base_dir: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        let binaries_dir = layout::binaries_root(base_dir);
        tokio::fs::create_dir_all(&binaries_dir)
            .await
            .map_err(|err| CacheError::io(&binaries_dir, err))?;
        let metadata_path = base_dir.join(METADATA_FILE);
        let state = CacheMetadata::load(&metadata_path).await;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            binaries_dir,
            metadata_path,
            max_bytes,
            state: Mutex::new(state),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Looks up the primary file for `key`
    ///
    /// A hit refreshes the entry's access time and persists it. An entry
    /// whose file has vanished from disk is dropped from the metadata and
    /// reported as a miss.
    pub async fn cached_path(&self, key: &CacheKey) -> Result<Option<PathBuf>, CacheError> {
        let mut state = self.state.lock().await;
        let file_name = match state.get(key) {
            Some(entry) => entry.file_name.clone(),
            None => return Ok(None),
        };
        let path = self.entry_dir(key).join(&file_name);
        if !file_exists(&path).await {
            warn!(key = %key, "cached file missing on disk, dropping entry");
            state.remove(key);
            state.save(&self.metadata_path).await?;
            return Ok(None);
        }
        state.touch(key);
        state.save(&self.metadata_path).await?;
        Ok(Some(path))
    }

    /// Moves a staged download directory into the cache under `key`
    ///
    /// Evicts least recently used entries first when the incoming bytes would
    /// push the cache past its budget. Returns the final path of the primary
    /// file. Re-registering a key replaces its previous contents.
    pub async fn register(
        &self,
        key: &CacheKey,
        staged_dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf, CacheError> {
        let incoming = dir_size(staged_dir)
            .await
            .map_err(|err| CacheError::io(staged_dir, err))?;
        let mut state = self.state.lock().await;

        if state.remove(key).is_some() {
            let old_dir = self.entry_dir(key);
            if let Err(err) = tokio::fs::remove_dir_all(&old_dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(key = %key, error = %err, "failed to clear replaced entry");
                }
            }
        }

        self.evict_locked(&mut state, incoming).await;
        if state.total_bytes() + incoming > self.max_bytes {
            // Oversized entries admit anyway; a binary larger than the whole
            // budget must still be usable.
            warn!(
                key = %key,
                incoming,
                budget = self.max_bytes,
                "cache over budget after eviction"
            );
        }

        let dir = self.entry_dir(key);
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CacheError::io(parent, err))?;
        }
        move_dir(staged_dir, &dir)
            .await
            .map_err(|err| CacheError::io(&dir, err))?;

        let now = Utc::now();
        state.insert(CacheEntry {
            package: key.package.clone(),
            version: key.version.clone(),
            rid: key.rid.clone(),
            provider: key.provider.clone(),
            file_name: file_name.to_string(),
            size_bytes: incoming,
            cached_at: now,
            last_access: now,
        });
        state.save(&self.metadata_path).await?;
        info!(key = %key, size_bytes = incoming, "registered runtime binary");
        Ok(dir.join(file_name))
    }

    /// Deletes one entry and its files; returns whether it was recorded
    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        let dir = self.entry_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => self.prune_empty_ancestors(&dir).await,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(CacheError::io(dir, err)),
        }
        let existed = state.remove(key).is_some();
        if existed {
            state.save(&self.metadata_path).await?;
        }
        Ok(existed)
    }

    /// Deletes every cached binary and resets the metadata
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        match tokio::fs::remove_dir_all(&self.binaries_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(CacheError::io(&self.binaries_dir, err)),
        }
        tokio::fs::create_dir_all(&self.binaries_dir)
            .await
            .map_err(|err| CacheError::io(&self.binaries_dir, err))?;
        state.entries.clear();
        state.save(&self.metadata_path).await
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entry_count: state.entries.len(),
            total_bytes: state.total_bytes(),
            max_bytes: self.max_bytes,
            base_dir: self.base_dir.clone(),
        }
    }

    /// All entries, most recently used first
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().await;
        state.lru_order().into_iter().rev().collect()
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.binaries_dir.join(key.relative_dir())
    }

    /// Evicts LRU entries until `incoming` fits; an entry whose files cannot
    /// be deleted is skipped and the next candidate is tried
    async fn evict_locked(&self, state: &mut CacheMetadata, incoming: u64) {
        if state.total_bytes() + incoming <= self.max_bytes {
            return;
        }
        for victim in state.lru_order() {
            if state.total_bytes() + incoming <= self.max_bytes {
                break;
            }
            let key = victim.key();
            let dir = self.entry_dir(&key);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    state.remove(&key);
                    self.prune_empty_ancestors(&dir).await;
                    info!(key = %key, freed_bytes = victim.size_bytes, "evicted cache entry");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    state.remove(&key);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "eviction failed, skipping entry");
                }
            }
        }
    }

    /// Removes now-empty parents of a deleted entry, stopping at the
    /// binaries root
    async fn prune_empty_ancestors(&self, entry_dir: &Path) {
        let mut current = entry_dir.parent().map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.binaries_dir || !dir.starts_with(&self.binaries_dir) {
                break;
            }
            match tokio::fs::remove_dir(&dir).await {
                Ok(()) => current = dir.parent().map(Path::to_path_buf),
                Err(_) => break,
            }
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Recursive directory size in bytes
async fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

/// Renames a directory, falling back to copy + delete across filesystems
async fn move_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir(src, dst).await?;
            tokio::fs::remove_dir_all(src).await
        }
    }
}

async fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dst).await?;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.metadata().await?.is_dir() {
                tokio::fs::create_dir_all(&target).await?;
                stack.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
