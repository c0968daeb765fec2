//! Cached system detection
//!
//! [`SystemDetector`] owns all probe state. It is constructed once at
//! startup and shared behind an `Arc`; the first call to each accessor runs
//! the probe and later calls return the cached answer, so repeated
//! detection is free and deterministic within a process. `clear_cache`
//! exists for tests and for long-lived processes that want to observe
//! hardware changes.

use std::sync::{Arc, PoisonError, RwLock};
use sysinfo::System;
use tracing::{debug, info};

use super::gpu::{self, GpuInfo, GpuVendor};
use super::nvml;
use super::platform::PlatformInfo;

/// Host memory snapshot, taken on first use
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SystemMemory {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Memoizing hardware detector
pub struct SystemDetector {
    platform: RwLock<Option<PlatformInfo>>,
    gpus: RwLock<Option<Arc<Vec<GpuInfo>>>>,
    memory: RwLock<Option<SystemMemory>>,
}

impl SystemDetector {
    pub fn new() -> Self {
        Self {
            platform: RwLock::new(None),
            gpus: RwLock::new(None),
            memory: RwLock::new(None),
        }
    }

    /// OS and architecture identity of this host
    pub fn platform(&self) -> PlatformInfo {
        if let Some(cached) = read(&self.platform).clone() {
            return cached;
        }
        let detected = PlatformInfo::current();
        debug!(rid = %detected.rid, "platform detected");
        write(&self.platform).get_or_insert(detected).clone()
    }

    /// All GPU records for this host; never empty
    ///
    /// The returned `Arc` is the cache itself: repeated calls hand back the
    /// same allocation until [`clear_cache`](Self::clear_cache).
    pub fn all_gpus(&self) -> Arc<Vec<GpuInfo>> {
        if let Some(cached) = read(&self.gpus).clone() {
            return cached;
        }
        let platform = self.platform();
        let detected = Arc::new(self.probe_gpus(&platform));
        write(&self.gpus).get_or_insert(detected).clone()
    }

    /// The preferred GPU record (first in detection order)
    pub fn primary_gpu(&self) -> GpuInfo {
        // probe_gpus always emits at least a sentinel
        self.all_gpus()
            .first()
            .cloned()
            .unwrap_or_else(GpuInfo::cpu_sentinel)
    }

    /// Total and available system RAM
    pub fn memory(&self) -> SystemMemory {
        if let Some(cached) = *read(&self.memory) {
            return cached;
        }
        let mut sys = System::new_all();
        sys.refresh_memory();
        let snapshot = SystemMemory {
            total_bytes: sys.total_memory(),
            available_bytes: sys.available_memory(),
        };
        *write(&self.memory).get_or_insert(snapshot)
    }

    /// Drops every cached answer; the next accessor call re-probes
    pub fn clear_cache(&self) {
        *write(&self.platform) = None;
        *write(&self.gpus) = None;
        *write(&self.memory) = None;
    }

    fn probe_gpus(&self, platform: &PlatformInfo) -> Vec<GpuInfo> {
        let directml = gpu::directml_supported(platform);
        let coreml = gpu::coreml_supported(platform);

        let mut records: Vec<GpuInfo> = match nvml::probe_nvidia() {
            Ok(probe) => probe
                .devices
                .into_iter()
                .map(|device| GpuInfo {
                    vendor: GpuVendor::Nvidia,
                    device_name: device.name,
                    total_memory_bytes: device.total_memory_bytes,
                    compute_capability: device.compute_capability,
                    directml_supported: directml,
                    coreml_supported: coreml,
                    cuda_driver_version: probe.driver,
                })
                .collect(),
            Err(err) => {
                debug!(error = %err, "no NVIDIA devices visible");
                Vec::new()
            }
        };

        if records.is_empty() {
            let synthesized = if coreml {
                GpuInfo::apple(platform.arch)
            } else if directml {
                GpuInfo::directml_adapter()
            } else {
                GpuInfo::cpu_sentinel()
            };
            records.push(synthesized);
        }

        info!(
            devices = records.len(),
            primary = %records[0].device_name,
            "GPU detection complete"
        );
        records
    }
}

impl Default for SystemDetector {
    fn default() -> Self {
        Self::new()
    }
}

// Detection closures hold no state that can be left inconsistent, so a
// poisoned lock is safe to enter.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_is_idempotent() {
        let detector = SystemDetector::new();
        assert_eq!(detector.platform(), detector.platform());
    }

    #[test]
    fn test_gpus_cached_by_identity() {
        let detector = SystemDetector::new();
        let first = detector.all_gpus();
        let second = detector.all_gpus();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_gpus_never_empty() {
        let detector = SystemDetector::new();
        assert!(!detector.all_gpus().is_empty());
    }

    #[test]
    fn test_clear_cache_reprobes_to_same_answer() {
        let detector = SystemDetector::new();
        let before = detector.all_gpus();
        detector.clear_cache();
        let after = detector.all_gpus();
        // New allocation, same hardware.
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    #[test]
    fn test_memory_snapshot_nonzero() {
        let detector = SystemDetector::new();
        let memory = detector.memory();
        assert!(memory.total_bytes > 0);
        assert!(memory.available_bytes <= memory.total_bytes);
    }

    #[test]
    fn test_primary_gpu_matches_first_record() {
        let detector = SystemDetector::new();
        assert_eq!(detector.primary_gpu(), detector.all_gpus()[0]);
    }
}
