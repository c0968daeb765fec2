//! Operating system and CPU architecture identification
//!
//! The runtime identifier (rid) names the platform a binary was built for,
//! e.g. `win-x64`, `linux-x64`, `osx-arm64`. Manifest entries carry the same
//! identifiers, so the mapping here must stay in sync with what publishers
//! use.

use serde::Serialize;
use std::fmt;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl OsKind {
    /// The OS the crate was compiled for
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => OsKind::Windows,
            "macos" => OsKind::MacOs,
            "linux" => OsKind::Linux,
            _ => OsKind::Other,
        }
    }

    /// The rid segment for this OS
    pub fn rid_part(&self) -> &'static str {
        match self {
            OsKind::Windows => "win",
            OsKind::MacOs => "osx",
            OsKind::Linux => "linux",
            OsKind::Other => std::env::consts::OS,
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsKind::Windows => "Windows",
            OsKind::MacOs => "macOS",
            OsKind::Linux => "Linux",
            OsKind::Other => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    X64,
    Arm64,
    Other,
}

impl CpuArch {
    /// The architecture the crate was compiled for
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => CpuArch::X64,
            "aarch64" => CpuArch::Arm64,
            _ => CpuArch::Other,
        }
    }

    /// The rid segment for this architecture
    pub fn rid_part(&self) -> &'static str {
        match self {
            CpuArch::X64 => "x64",
            CpuArch::Arm64 => "arm64",
            CpuArch::Other => std::env::consts::ARCH,
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rid_part())
    }
}

/// Identity of the host platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub os: OsKind,
    pub arch: CpuArch,
    /// Runtime identifier, `{os}-{arch}`
    pub rid: String,
}

impl PlatformInfo {
    /// Builds the platform identity for the host this binary runs on
    pub fn current() -> Self {
        let os = OsKind::current();
        let arch = CpuArch::current();
        Self {
            rid: rid_for(os, arch),
            os,
            arch,
        }
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.os, self.rid)
    }
}

/// Composes the runtime identifier for an OS/architecture pair
pub fn rid_for(os: OsKind, arch: CpuArch) -> String {
    format!("{}-{}", os.rid_part(), arch.rid_part())
}

/// Extracts a Windows build number from a sysinfo version string
///
/// sysinfo reports different shapes per source: a bare build (`"19045"`),
/// a parenthesized form (`"10 (19045)"`), or dotted (`"10.0.19045"`). The
/// build is always the numerically largest run of digits in the string.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn parse_windows_build(version: &str) -> Option<u32> {
    let mut best: Option<u32> = None;
    let mut current: Option<u64> = None;
    for ch in version.chars().chain(std::iter::once(' ')) {
        if let Some(digit) = ch.to_digit(10) {
            current = Some(current.unwrap_or(0).saturating_mul(10) + digit as u64);
        } else if let Some(run) = current.take() {
            let run = u32::try_from(run).unwrap_or(u32::MAX);
            if best.map_or(true, |b| run > b) {
                best = Some(run);
            }
        }
    }
    best
}

/// Parses `major.minor` from a macOS version string like `"13.4.1"`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_macos_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Windows build number of the host, if it can be determined
#[cfg(target_os = "windows")]
pub(crate) fn host_windows_build() -> Option<u32> {
    sysinfo::System::kernel_version()
        .as_deref()
        .and_then(parse_windows_build)
        .or_else(|| {
            sysinfo::System::os_version()
                .as_deref()
                .and_then(parse_windows_build)
        })
}

/// macOS version of the host, if it can be determined
#[cfg(target_os = "macos")]
pub(crate) fn host_macos_version() -> Option<(u32, u32)> {
    sysinfo::System::os_version()
        .as_deref()
        .and_then(parse_macos_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_for_known_pairs() {
        assert_eq!(rid_for(OsKind::Windows, CpuArch::X64), "win-x64");
        assert_eq!(rid_for(OsKind::MacOs, CpuArch::Arm64), "osx-arm64");
        assert_eq!(rid_for(OsKind::Linux, CpuArch::X64), "linux-x64");
        assert_eq!(rid_for(OsKind::Linux, CpuArch::Arm64), "linux-arm64");
    }

    #[test]
    fn test_current_platform_rid_matches_parts() {
        let platform = PlatformInfo::current();
        assert_eq!(
            platform.rid,
            format!("{}-{}", platform.os.rid_part(), platform.arch.rid_part())
        );
    }

    #[test]
    fn test_parse_windows_build_bare() {
        assert_eq!(parse_windows_build("19045"), Some(19045));
    }

    #[test]
    fn test_parse_windows_build_parenthesized() {
        assert_eq!(parse_windows_build("10 (19045)"), Some(19045));
    }

    #[test]
    fn test_parse_windows_build_dotted() {
        assert_eq!(parse_windows_build("10.0.22631"), Some(22631));
        assert_eq!(parse_windows_build("22631.2861"), Some(22631));
    }

    #[test]
    fn test_parse_windows_build_no_digits() {
        assert_eq!(parse_windows_build("unknown"), None);
        assert_eq!(parse_windows_build(""), None);
    }

    #[test]
    fn test_parse_macos_version() {
        assert_eq!(parse_macos_version("13.4.1"), Some((13, 4)));
        assert_eq!(parse_macos_version("10.15.7"), Some((10, 15)));
        assert_eq!(parse_macos_version("14"), Some((14, 0)));
        assert_eq!(parse_macos_version("garbage"), None);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(OsKind::MacOs.to_string(), "macOS");
        assert_eq!(CpuArch::Arm64.to_string(), "arm64");
        let platform = PlatformInfo {
            os: OsKind::Linux,
            arch: CpuArch::X64,
            rid: "linux-x64".to_string(),
        };
        assert_eq!(platform.to_string(), "Linux (linux-x64)");
    }
}
