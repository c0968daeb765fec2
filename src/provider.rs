//! Execution provider resolution
//!
//! An execution provider names the backend a runtime binary targets. The
//! preference order is fixed: CUDA over DirectML over CoreML over CPU, with
//! CPU always available as the final fallback. Ordering is a pure function
//! of the detected platform and GPU so it can be exercised with synthetic
//! records; [`ProviderResolver`] is the thin live wrapper over a shared
//! [`SystemDetector`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::detect::{GpuInfo, GpuVendor, OsKind, PlatformInfo, SystemDetector};

/// Minimum CUDA driver major version required for the CUDA provider
const CUDA_MIN_DRIVER_MAJOR: u32 = 11;

/// Inference backend a binary targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Placeholder meaning "pick the best available"; resolved before use
    Auto,
    Cuda,
    #[serde(rename = "directml")]
    DirectML,
    #[serde(rename = "coreml")]
    CoreML,
    Cpu,
}

impl ExecutionProvider {
    /// Canonical lowercase token, as used in manifests and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::Auto => "auto",
            ExecutionProvider::Cuda => "cuda",
            ExecutionProvider::DirectML => "directml",
            ExecutionProvider::CoreML => "coreml",
            ExecutionProvider::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ExecutionProvider::Auto),
            "cuda" => Ok(ExecutionProvider::Cuda),
            "directml" | "dml" => Ok(ExecutionProvider::DirectML),
            "coreml" => Ok(ExecutionProvider::CoreML),
            "cpu" => Ok(ExecutionProvider::Cpu),
            other => Err(format!(
                "unknown execution provider '{}'. Valid options: auto, cuda, directml, coreml, cpu",
                other
            )),
        }
    }
}

/// Providers usable on the given platform with the given GPU, best first
///
/// CPU is always present and always last. CUDA requires an NVIDIA device
/// with a driver of major version 11 or newer; DirectML and CoreML are
/// OS-bound capabilities carried on the GPU record.
pub fn available_providers_for(platform: &PlatformInfo, gpu: &GpuInfo) -> Vec<ExecutionProvider> {
    let mut providers = Vec::with_capacity(2);

    if gpu.vendor == GpuVendor::Nvidia {
        let driver_ok = gpu
            .cuda_driver_version
            .map(|v| v.major >= CUDA_MIN_DRIVER_MAJOR)
            .unwrap_or(false);
        if driver_ok {
            providers.push(ExecutionProvider::Cuda);
        }
    }
    if platform.os == OsKind::Windows && gpu.directml_supported {
        providers.push(ExecutionProvider::DirectML);
    }
    if platform.os == OsKind::MacOs && gpu.coreml_supported {
        providers.push(ExecutionProvider::CoreML);
    }
    providers.push(ExecutionProvider::Cpu);
    providers
}

/// Resolves provider requests against live detection results
pub struct ProviderResolver {
    detector: Arc<SystemDetector>,
}

impl ProviderResolver {
    pub fn new(detector: Arc<SystemDetector>) -> Self {
        Self { detector }
    }

    /// Providers available on this host, best first
    pub fn available(&self) -> Vec<ExecutionProvider> {
        let platform = self.detector.platform();
        let gpu = self.detector.primary_gpu();
        available_providers_for(&platform, &gpu)
    }

    /// Resolves `Auto` to the best available provider
    ///
    /// An explicit request is honored as-is, even when detection says the
    /// provider is unavailable; the caller asked for it deliberately.
    pub fn resolve(&self, requested: ExecutionProvider) -> ExecutionProvider {
        match requested {
            ExecutionProvider::Auto => self
                .available()
                .first()
                .copied()
                .unwrap_or(ExecutionProvider::Cpu),
            explicit => explicit,
        }
    }
}
