//! Hardware and platform detection
//!
//! Answers two questions for the rest of the crate: what machine are we on
//! (OS, architecture, runtime identifier) and what acceleration hardware is
//! available (NVIDIA devices via NVML, DirectML on Windows, CoreML on
//! macOS). Probing is best-effort by design; a detection failure downgrades
//! the answer, it never aborts startup.
//!
//! [`SystemDetector`] caches results for its lifetime and is shared behind
//! an `Arc`; there is no global detector state.

pub mod detector;
pub mod gpu;
pub mod nvml;
pub mod platform;

pub use detector::{SystemDetector, SystemMemory};
pub use gpu::{DriverVersion, GpuInfo, GpuVendor};
pub use nvml::ProbeError;
pub use platform::{CpuArch, OsKind, PlatformInfo};
