//! Runtime binding to the NVIDIA management library (NVML)
//!
//! NVML ships with the NVIDIA driver, so it cannot be a link-time
//! dependency: machines without the driver must still run. The library is
//! opened with `libloading` at probe time, the handful of symbols we need
//! are resolved into typed function pointers, and every call returns a
//! [`ProbeError`] instead of panicking. The detector flattens all of these
//! errors into "no NVIDIA device".

use libloading::Library;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use super::gpu::DriverVersion;

/// NVML status code; 0 is success
type NvmlReturn = c_int;

/// Opaque device handle
type NvmlDevice = *mut c_void;

/// `nvmlMemory_t`; all three fields are required for the ABI layout even
/// though only `total` is consumed
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NvmlMemory {
    pub total: u64,
    #[allow(dead_code)]
    pub free: u64,
    #[allow(dead_code)]
    pub used: u64,
}

type FnInit = unsafe extern "C" fn() -> NvmlReturn;
type FnShutdown = unsafe extern "C" fn() -> NvmlReturn;
type FnCudaDriverVersion = unsafe extern "C" fn(*mut c_int) -> NvmlReturn;
type FnDeviceCount = unsafe extern "C" fn(*mut c_uint) -> NvmlReturn;
type FnDeviceHandle = unsafe extern "C" fn(c_uint, *mut NvmlDevice) -> NvmlReturn;
type FnDeviceName = unsafe extern "C" fn(NvmlDevice, *mut c_char, c_uint) -> NvmlReturn;
type FnMemoryInfo = unsafe extern "C" fn(NvmlDevice, *mut NvmlMemory) -> NvmlReturn;
type FnComputeCapability = unsafe extern "C" fn(NvmlDevice, *mut c_int, *mut c_int) -> NvmlReturn;

/// `NVML_DEVICE_NAME_V2_BUFFER_SIZE`
const NAME_BUFFER_LEN: usize = 96;

/// Why a native probe could not produce an answer
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("management library not found (searched: {0})")]
    LibraryNotFound(String),

    #[error("symbol {0} missing from management library")]
    MissingSymbol(&'static str),

    #[error("{call} failed with status {status}")]
    Call { call: &'static str, status: i32 },
}

fn check(status: NvmlReturn, call: &'static str) -> Result<(), ProbeError> {
    if status == 0 {
        Ok(())
    } else {
        Err(ProbeError::Call { call, status })
    }
}

/// Typed handle over a successfully opened NVML library
///
/// Built by [`NvmlLib::bind`]; holding the `Library` keeps the mapped code
/// alive for as long as the function pointers are reachable.
pub(crate) struct NvmlLib {
    _lib: Library,
    init: FnInit,
    shutdown: FnShutdown,
    cuda_driver_version: FnCudaDriverVersion,
    device_count: FnDeviceCount,
    device_handle: FnDeviceHandle,
    device_name: FnDeviceName,
    memory_info: FnMemoryInfo,
    compute_capability: FnComputeCapability,
}

impl NvmlLib {
    /// Opens NVML from the platform search paths and resolves all symbols
    pub(crate) fn bind() -> Result<Self, ProbeError> {
        let lib = open_library()?;
        macro_rules! resolve {
            ($ty:ty, $name:literal) => {
                // Deref copies the raw fn pointer out of the Symbol, so the
                // borrow of `lib` ends before `lib` moves into Self.
                unsafe {
                    *lib.get::<$ty>(concat!($name, "\0").as_bytes())
                        .map_err(|_| ProbeError::MissingSymbol($name))?
                }
            };
        }
        let init = resolve!(FnInit, "nvmlInit_v2");
        let shutdown = resolve!(FnShutdown, "nvmlShutdown");
        let cuda_driver_version = resolve!(FnCudaDriverVersion, "nvmlSystemGetCudaDriverVersion");
        let device_count = resolve!(FnDeviceCount, "nvmlDeviceGetCount_v2");
        let device_handle = resolve!(FnDeviceHandle, "nvmlDeviceGetHandleByIndex_v2");
        let device_name = resolve!(FnDeviceName, "nvmlDeviceGetName");
        let memory_info = resolve!(FnMemoryInfo, "nvmlDeviceGetMemoryInfo");
        let compute_capability = resolve!(FnComputeCapability, "nvmlDeviceGetCudaComputeCapability");
        Ok(Self {
            _lib: lib,
            init,
            shutdown,
            cuda_driver_version,
            device_count,
            device_handle,
            device_name,
            memory_info,
            compute_capability,
        })
    }

    pub(crate) fn init(&self) -> Result<(), ProbeError> {
        check(unsafe { (self.init)() }, "nvmlInit_v2")
    }

    /// Errors on shutdown are unactionable; the library is dropped either way
    pub(crate) fn shutdown(&self) {
        let _ = unsafe { (self.shutdown)() };
    }

    pub(crate) fn cuda_driver_version(&self) -> Result<DriverVersion, ProbeError> {
        let mut encoded: c_int = 0;
        check(
            unsafe { (self.cuda_driver_version)(&mut encoded) },
            "nvmlSystemGetCudaDriverVersion",
        )?;
        Ok(DriverVersion::from_encoded(encoded))
    }

    pub(crate) fn device_count(&self) -> Result<u32, ProbeError> {
        let mut count: c_uint = 0;
        check(unsafe { (self.device_count)(&mut count) }, "nvmlDeviceGetCount_v2")?;
        Ok(count)
    }

    pub(crate) fn device_handle(&self, index: u32) -> Result<NvmlDevice, ProbeError> {
        let mut handle: NvmlDevice = std::ptr::null_mut();
        check(
            unsafe { (self.device_handle)(index, &mut handle) },
            "nvmlDeviceGetHandleByIndex_v2",
        )?;
        Ok(handle)
    }

    pub(crate) fn device_name(&self, device: NvmlDevice) -> Result<String, ProbeError> {
        let mut buf = [0 as c_char; NAME_BUFFER_LEN];
        check(
            unsafe { (self.device_name)(device, buf.as_mut_ptr(), NAME_BUFFER_LEN as c_uint) },
            "nvmlDeviceGetName",
        )?;
        Ok(string_from_buffer(&buf))
    }

    pub(crate) fn memory_info(&self, device: NvmlDevice) -> Result<NvmlMemory, ProbeError> {
        let mut memory = NvmlMemory::default();
        check(
            unsafe { (self.memory_info)(device, &mut memory) },
            "nvmlDeviceGetMemoryInfo",
        )?;
        Ok(memory)
    }

    pub(crate) fn compute_capability(&self, device: NvmlDevice) -> Result<(u32, u32), ProbeError> {
        let mut major: c_int = 0;
        let mut minor: c_int = 0;
        check(
            unsafe { (self.compute_capability)(device, &mut major, &mut minor) },
            "nvmlDeviceGetCudaComputeCapability",
        )?;
        Ok((major.max(0) as u32, minor.max(0) as u32))
    }
}

/// One enumerated NVIDIA device, best-effort fields already defaulted
#[derive(Debug, Clone)]
pub(crate) struct NvidiaDevice {
    pub name: String,
    pub total_memory_bytes: Option<u64>,
    pub compute_capability: Option<(u32, u32)>,
}

/// Outcome of a successful NVML enumeration
#[derive(Debug, Clone, Default)]
pub(crate) struct NvidiaProbe {
    pub driver: Option<DriverVersion>,
    pub devices: Vec<NvidiaDevice>,
}

/// Binds NVML, enumerates devices, and shuts the library back down
///
/// Any error means "treat this machine as having no NVIDIA device". Partial
/// per-device failures degrade to defaults instead of failing the probe.
pub(crate) fn probe_nvidia() -> Result<NvidiaProbe, ProbeError> {
    let lib = NvmlLib::bind()?;
    lib.init()?;
    let result = enumerate(&lib);
    lib.shutdown();
    result
}

fn enumerate(lib: &NvmlLib) -> Result<NvidiaProbe, ProbeError> {
    let driver = match lib.cuda_driver_version() {
        Ok(v) => Some(v),
        Err(err) => {
            debug!(error = %err, "CUDA driver version unavailable");
            None
        }
    };

    let count = lib.device_count()?;
    let mut devices = Vec::with_capacity(count as usize);
    for index in 0..count {
        let handle = match lib.device_handle(index) {
            Ok(h) => h,
            Err(err) => {
                warn!(index, error = %err, "skipping unreadable NVIDIA device");
                continue;
            }
        };
        let name = lib
            .device_name(handle)
            .unwrap_or_else(|_| "NVIDIA GPU".to_string());
        let total_memory_bytes = lib.memory_info(handle).ok().map(|m| m.total);
        let compute_capability = lib.compute_capability(handle).ok();
        devices.push(NvidiaDevice {
            name,
            total_memory_bytes,
            compute_capability,
        });
    }
    Ok(NvidiaProbe { driver, devices })
}

fn candidate_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let program_files = std::env::var("ProgramFiles")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Program Files"));
        vec![
            PathBuf::from("nvml.dll"),
            program_files.join("NVIDIA Corporation\\NVSMI\\nvml.dll"),
        ]
    }
    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("libnvidia-ml.so.1"),
            PathBuf::from("libnvidia-ml.so"),
        ]
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        // No NVML on macOS and friends.
        Vec::new()
    }
}

fn open_library() -> Result<Library, ProbeError> {
    let candidates = candidate_paths();
    for path in &candidates {
        // Loading a driver-provided library; dlopen side effects only.
        match unsafe { Library::new(path) } {
            Ok(lib) => {
                debug!(path = %path.display(), "bound NVIDIA management library");
                return Ok(lib);
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "NVML candidate not loadable");
            }
        }
    }
    let searched = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let searched = if searched.is_empty() {
        "no candidates on this platform".to_string()
    } else {
        searched
    };
    Err(ProbeError::LibraryNotFound(searched))
}

fn string_from_buffer(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}
