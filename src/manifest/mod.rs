//! Runtime distribution manifest
//!
//! The manifest is a JSON document published alongside runtime binaries. It
//! maps package names to versions and each version to the concrete binaries
//! available per platform (rid) and execution provider. [`ManifestProvider`]
//! keeps a fresh copy available through a layered fallback chain: in-memory
//! within a TTL, conditional refetch with `If-None-Match`, the on-disk
//! snapshot, a stale in-memory copy, and finally a built-in default.

pub mod provider;
pub mod schema;
pub mod source;

use thiserror::Error;

pub use provider::ManifestProvider;
pub use schema::{ManifestPackage, PackageVersion, RuntimeBinaryEntry, RuntimeManifest};
pub use source::{FetchOutcome, HttpManifestSource, ManifestSource, ScriptedManifestSource};

/// Manifest retrieval and parsing failures
///
/// Only `Parse` escapes [`ManifestProvider::get`]: a fresh response that is
/// not valid manifest JSON cannot be silently interpreted. Everything else
/// is degraded into the fallback chain and logged.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest endpoint returned HTTP {0}")]
    Status(u16),

    #[error("manifest fetch failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("manifest fetch cancelled")]
    Cancelled,
}
