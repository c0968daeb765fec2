//! Manifest document model and read-only projections
//!
//! Field names follow the published wire format exactly (`updated`,
//! `released`, `fileName`, `size`); renames here are load-bearing. Parsed
//! documents are immutable; every accessor is a projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::ManifestError;

/// Top-level manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeManifest {
    /// Manifest format version
    pub version: String,

    /// When the publisher last regenerated the document
    #[serde(rename = "updated")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub packages: BTreeMap<String, ManifestPackage>,
}

/// One distributable runtime package (e.g. an inference engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPackage {
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default)]
    pub versions: BTreeMap<String, PackageVersion>,
}

/// One published version of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    #[serde(rename = "released")]
    pub released_at: DateTime<Utc>,

    #[serde(default)]
    pub binaries: Vec<RuntimeBinaryEntry>,
}

/// One downloadable artifact for a specific platform and provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeBinaryEntry {
    /// Runtime identifier this binary was built for, e.g. `linux-x64`
    pub rid: String,

    /// Execution provider token, e.g. `cuda`
    pub provider: String,

    pub url: String,

    #[serde(rename = "fileName")]
    pub file_name: String,

    #[serde(rename = "size")]
    pub size_bytes: u64,

    /// Lowercase hex digest of the artifact
    pub sha256: String,

    /// File names of sibling artifacts this binary needs at runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl RuntimeBinaryEntry {
    fn matches(&self, rid: &str, provider: &str) -> bool {
        self.rid.eq_ignore_ascii_case(rid) && self.provider.eq_ignore_ascii_case(provider)
    }
}

impl RuntimeManifest {
    /// Looks up a package by name, case-insensitively
    pub fn package(&self, name: &str) -> Option<&ManifestPackage> {
        self.packages
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, pkg)| pkg)
    }

    /// The binary published for an exact package/version/rid/provider tuple
    pub fn get_binary(
        &self,
        package: &str,
        version: &str,
        rid: &str,
        provider: &str,
    ) -> Option<&RuntimeBinaryEntry> {
        self.package(package)?
            .versions
            .get(version)?
            .binaries
            .iter()
            .find(|entry| entry.matches(rid, provider))
    }

    /// All binaries of one package version; empty when unknown
    pub fn version_binaries(&self, package: &str, version: &str) -> &[RuntimeBinaryEntry] {
        self.package(package)
            .and_then(|pkg| pkg.versions.get(version))
            .map(|v| v.binaries.as_slice())
            .unwrap_or(&[])
    }

    /// Highest published version of a package
    pub fn latest_version(&self, package: &str) -> Option<&str> {
        self.package(package)?
            .versions
            .keys()
            .max_by(|a, b| compare_versions(a, b))
            .map(String::as_str)
    }

    /// The newest version carrying a binary for rid/provider
    ///
    /// Versions that do not publish a matching binary are skipped, so an
    /// incomplete rollout of the newest version does not hide older usable
    /// releases.
    pub fn get_latest_binary(
        &self,
        package: &str,
        rid: &str,
        provider: &str,
    ) -> Option<(&str, &RuntimeBinaryEntry)> {
        let pkg = self.package(package)?;
        let mut versions: Vec<&String> = pkg.versions.keys().collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        for version in versions {
            if let Some(published) = pkg.versions.get(version) {
                if let Some(entry) = published.binaries.iter().find(|b| b.matches(rid, provider)) {
                    return Some((version.as_str(), entry));
                }
            }
        }
        None
    }
}

/// Parses a manifest document from JSON text
pub fn parse(text: &str) -> Result<RuntimeManifest, ManifestError> {
    Ok(serde_json::from_str(text)?)
}

/// Numeric dotted version comparison, ascending
///
/// Segments parse leniently: non-numeric segments count as zero, missing
/// segments pad with zero, so `1.17` == `1.17.0` and `1.17.0` > `1.9.3`.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    let pa = version_parts(a);
    let pb = version_parts(b);
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let va = pa.get(i).copied().unwrap_or(0);
        let vb = pb.get(i).copied().unwrap_or(0);
        match va.cmp(&vb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn version_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}
