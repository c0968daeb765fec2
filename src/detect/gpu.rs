//! GPU descriptors and per-platform acceleration probes
//!
//! [`GpuInfo`] is the detector's unit of output. Discovered NVIDIA devices,
//! synthesized integrated-GPU records, and the CPU-only sentinel all share
//! this shape so downstream provider resolution has one thing to look at.

use serde::Serialize;
use std::fmt;

use super::platform::{CpuArch, OsKind, PlatformInfo};

/// Minimum Windows build carrying DirectML (1903)
const DIRECTML_MIN_WINDOWS_BUILD: u32 = 18362;

/// Minimum macOS version carrying CoreML on Intel hardware
const COREML_MIN_MACOS: (u32, u32) = (10, 13);

/// GPU hardware vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    /// Sentinel vendor for records that do not describe a discrete device
    None,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Amd => "AMD",
            GpuVendor::Intel => "Intel",
            GpuVendor::Apple => "Apple",
            GpuVendor::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// CUDA driver version as reported by the NVIDIA management library
///
/// NVML encodes the version as `major * 1000 + minor * 10`; 12040 is 12.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
}

impl DriverVersion {
    /// Decodes the NVML integer encoding
    pub fn from_encoded(encoded: i32) -> Self {
        let encoded = encoded.max(0) as u32;
        Self {
            major: encoded / 1000,
            minor: (encoded % 1000) / 10,
        }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One detected (or synthesized) GPU record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuInfo {
    pub vendor: GpuVendor,
    pub device_name: String,
    /// Total device memory; `None` when the platform does not report it
    pub total_memory_bytes: Option<u64>,
    /// CUDA compute capability (NVIDIA only)
    pub compute_capability: Option<(u32, u32)>,
    pub directml_supported: bool,
    pub coreml_supported: bool,
    /// System-wide CUDA driver version, carried on every NVIDIA record
    pub cuda_driver_version: Option<DriverVersion>,
}

impl GpuInfo {
    /// Record emitted when no device and no acceleration API was found
    pub fn cpu_sentinel() -> Self {
        Self {
            vendor: GpuVendor::None,
            device_name: "CPU".to_string(),
            total_memory_bytes: None,
            compute_capability: None,
            directml_supported: false,
            coreml_supported: false,
            cuda_driver_version: None,
        }
    }

    /// Synthesized record for Apple platforms; CoreML is an OS capability,
    /// not a probed device
    pub fn apple(arch: CpuArch) -> Self {
        let (vendor, device_name) = match arch {
            CpuArch::Arm64 => (GpuVendor::Apple, "Apple Silicon GPU"),
            _ => (GpuVendor::Intel, "Integrated graphics"),
        };
        Self {
            vendor,
            device_name: device_name.to_string(),
            total_memory_bytes: None,
            compute_capability: None,
            directml_supported: false,
            coreml_supported: true,
            cuda_driver_version: None,
        }
    }

    /// Synthesized record for Windows machines where only DirectML is usable
    pub fn directml_adapter() -> Self {
        Self {
            vendor: GpuVendor::None,
            device_name: "Integrated graphics".to_string(),
            total_memory_bytes: None,
            compute_capability: None,
            directml_supported: true,
            coreml_supported: false,
            cuda_driver_version: None,
        }
    }
}

/// DirectML availability from raw facts; pure so every branch is testable
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn directml_from(build: Option<u32>, d3d12_present: bool) -> bool {
    matches!(build, Some(b) if b >= DIRECTML_MIN_WINDOWS_BUILD) && d3d12_present
}

/// CoreML availability from raw facts
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn coreml_from(arch: CpuArch, macos_version: Option<(u32, u32)>) -> bool {
    if arch == CpuArch::Arm64 {
        return true;
    }
    matches!(macos_version, Some(v) if v >= COREML_MIN_MACOS)
}

/// Probes DirectML support on the host
pub(crate) fn directml_supported(platform: &PlatformInfo) -> bool {
    if platform.os != OsKind::Windows {
        return false;
    }
    #[cfg(target_os = "windows")]
    {
        let system32 = std::env::var("WINDIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("C:\\Windows"))
            .join("System32");
        let d3d12_present = system32.join("D3D12.dll").is_file();
        directml_from(super::platform::host_windows_build(), d3d12_present)
    }
    #[cfg(not(target_os = "windows"))]
    {
        false
    }
}

/// Probes CoreML support on the host
pub(crate) fn coreml_supported(platform: &PlatformInfo) -> bool {
    if platform.os != OsKind::MacOs {
        return false;
    }
    #[cfg(target_os = "macos")]
    {
        coreml_from(platform.arch, super::platform::host_macos_version())
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_version_decoding() {
        let v = DriverVersion::from_encoded(12040);
        assert_eq!(v, DriverVersion { major: 12, minor: 4 });
        assert_eq!(DriverVersion::from_encoded(11000).major, 11);
        assert_eq!(DriverVersion::from_encoded(0), DriverVersion { major: 0, minor: 0 });
        // Negative values cannot come from a healthy driver; clamp to zero.
        assert_eq!(DriverVersion::from_encoded(-5).major, 0);
    }

    #[test]
    fn test_driver_version_display() {
        assert_eq!(DriverVersion::from_encoded(12040).to_string(), "12.4");
        assert_eq!(DriverVersion::from_encoded(11080).to_string(), "11.8");
    }

    #[test]
    fn test_directml_requires_build_and_dll() {
        assert!(directml_from(Some(18362), true));
        assert!(directml_from(Some(22631), true));
        assert!(!directml_from(Some(18361), true));
        assert!(!directml_from(Some(19045), false));
        assert!(!directml_from(None, true));
    }

    #[test]
    fn test_coreml_always_on_apple_silicon() {
        assert!(coreml_from(CpuArch::Arm64, None));
        assert!(coreml_from(CpuArch::Arm64, Some((10, 12))));
    }

    #[test]
    fn test_coreml_on_intel_needs_high_sierra() {
        assert!(coreml_from(CpuArch::X64, Some((10, 13))));
        assert!(coreml_from(CpuArch::X64, Some((13, 0))));
        assert!(!coreml_from(CpuArch::X64, Some((10, 12))));
        assert!(!coreml_from(CpuArch::X64, None));
    }

    #[test]
    fn test_cpu_sentinel_shape() {
        let sentinel = GpuInfo::cpu_sentinel();
        assert_eq!(sentinel.vendor, GpuVendor::None);
        assert_eq!(sentinel.device_name, "CPU");
        assert!(!sentinel.directml_supported);
        assert!(!sentinel.coreml_supported);
    }

    #[test]
    fn test_apple_record_by_arch() {
        let silicon = GpuInfo::apple(CpuArch::Arm64);
        assert_eq!(silicon.vendor, GpuVendor::Apple);
        assert!(silicon.coreml_supported);

        let intel = GpuInfo::apple(CpuArch::X64);
        assert_eq!(intel.vendor, GpuVendor::Intel);
        assert!(intel.coreml_supported);
    }

    #[test]
    fn test_probes_disabled_off_platform() {
        let linux = PlatformInfo {
            os: OsKind::Linux,
            arch: CpuArch::X64,
            rid: "linux-x64".to_string(),
        };
        assert!(!directml_supported(&linux));
        assert!(!coreml_supported(&linux));
    }
}
