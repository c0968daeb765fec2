//! Integration tests for the manifest fallback chain
//!
//! Exercises the provider against a scripted source: TTL short-circuit,
//! 304 revalidation, snapshot reuse across restarts, stale service when
//! the origin is down, and the embedded last resort.

use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use tempfile::TempDir;

use modelyard::manifest::{FetchOutcome, ManifestError, ManifestProvider, ScriptedManifestSource};
use modelyard::util::CancelToken;

fn manifest_body(marker: &str) -> String {
    format!(
        r#"{{
            "version": "1.0",
            "updated": "2025-06-01T00:00:00Z",
            "packages": {{
                "onnxruntime": {{
                    "description": "{marker}",
                    "versions": {{
                        "1.17.3": {{
                            "released": "2025-04-10T00:00:00Z",
                            "binaries": [
                                {{
                                    "rid": "linux-x64",
                                    "provider": "cpu",
                                    "url": "https://example.test/ort/libonnxruntime.so",
                                    "fileName": "libonnxruntime.so",
                                    "size": 1024,
                                    "sha256": "7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730"
                                }}
                            ]
                        }}
                    }}
                }}
            }}
        }}"#
    )
}

fn description(manifest: &modelyard::RuntimeManifest) -> &str {
    &manifest.package("onnxruntime").unwrap().description
}

#[tokio::test]
async fn test_memory_copy_served_within_ttl() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document(&manifest_body("first"), Some("\"v1\""));

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::from_secs(600));
    let cancel = CancelToken::new();

    let first = provider.get(&cancel).await.unwrap();
    let second = provider.get(&cancel).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_not_modified_reuses_parsed_copy_without_rewriting_snapshot() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document(&manifest_body("first"), Some("\"v1\""));
    source.push(Ok(FetchOutcome::NotModified));

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::ZERO);
    let cancel = CancelToken::new();

    let first = provider.get(&cancel).await.unwrap();

    // Pin the snapshot's mtime; a rewrite on the 304 path would bump it.
    let snapshot = dir.path().join("manifest/manifest.json");
    let pinned = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&snapshot, pinned).unwrap();

    let second = provider.get(&cancel).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.seen_etags()[1], Some("\"v1\"".to_string()));
    let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&snapshot).unwrap());
    assert_eq!(mtime, pinned);
}

#[tokio::test]
async fn test_restart_serves_snapshot_when_source_fails() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();

    {
        let source = Arc::new(ScriptedManifestSource::new());
        source.push_document(&manifest_body("persisted"), Some("\"v1\""));
        let provider = ManifestProvider::new(source, dir.path(), Duration::ZERO);
        provider.get(&cancel).await.unwrap();
    }

    let source = Arc::new(ScriptedManifestSource::new());
    source.push(Err(ManifestError::Status(503)));
    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::ZERO);

    let manifest = provider.get(&cancel).await.unwrap();
    assert_eq!(description(&manifest), "persisted");
    // The ETag persisted by the previous run was presented to the source.
    assert_eq!(source.seen_etags(), vec![Some("\"v1\"".to_string())]);
}

#[tokio::test]
async fn test_restart_revalidation_parses_snapshot_on_304() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();

    {
        let source = Arc::new(ScriptedManifestSource::new());
        source.push_document(&manifest_body("persisted"), Some("\"v1\""));
        let provider = ManifestProvider::new(source, dir.path(), Duration::ZERO);
        provider.get(&cancel).await.unwrap();
    }

    let source = Arc::new(ScriptedManifestSource::new());
    source.push(Ok(FetchOutcome::NotModified));
    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::from_secs(600));

    let manifest = provider.get(&cancel).await.unwrap();
    assert_eq!(description(&manifest), "persisted");
    assert_eq!(source.calls(), 1);

    // Revalidated, so the next get within the TTL stays local.
    provider.get(&cancel).await.unwrap();
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_stale_memory_survives_snapshot_loss() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document(&manifest_body("only-copy"), None);

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::ZERO);
    let cancel = CancelToken::new();

    let first = provider.get(&cancel).await.unwrap();
    std::fs::remove_file(dir.path().join("manifest/manifest.json")).unwrap();

    source.push(Err(ManifestError::Status(500)));
    let second = provider.get(&cancel).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_embedded_default_when_nothing_else_exists() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push(Err(ManifestError::Status(503)));

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::from_secs(600));
    let cancel = CancelToken::new();

    let manifest = provider.get(&cancel).await.unwrap();
    assert!(manifest
        .get_binary("onnxruntime", "1.17.3", "linux-x64", "cpu")
        .is_some());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_fresh_parse_error_is_the_one_hard_failure() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document("definitely not json", None);

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::ZERO);
    let cancel = CancelToken::new();

    let err = provider.get(&cancel).await.unwrap_err();
    assert!(matches!(err, ManifestError::Parse(_)));

    // The provider is not poisoned; a good document afterwards works.
    source.push_document(&manifest_body("recovered"), None);
    let manifest = provider.get(&cancel).await.unwrap();
    assert_eq!(description(&manifest), "recovered");
}

#[tokio::test]
async fn test_refresh_bypasses_ttl() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document(&manifest_body("first"), Some("\"v1\""));
    source.push(Ok(FetchOutcome::NotModified));

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::from_secs(600));
    let cancel = CancelToken::new();

    provider.get(&cancel).await.unwrap();
    assert_eq!(source.calls(), 1);

    provider.refresh(&cancel).await.unwrap();
    assert_eq!(source.calls(), 2);
    assert_eq!(source.seen_etags()[1], Some("\"v1\"".to_string()));
}

#[tokio::test]
async fn test_etag_cleared_when_fresh_response_has_none() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedManifestSource::new());
    source.push_document(&manifest_body("first"), Some("\"v1\""));
    source.push_document(&manifest_body("second"), None);
    source.push(Err(ManifestError::Status(500)));

    let provider = ManifestProvider::new(source.clone(), dir.path(), Duration::ZERO);
    let cancel = CancelToken::new();
    let etag_path = dir.path().join("manifest/manifest.etag");

    provider.get(&cancel).await.unwrap();
    assert!(etag_path.exists());

    provider.get(&cancel).await.unwrap();
    assert!(!etag_path.exists());

    provider.get(&cancel).await.unwrap();
    assert_eq!(source.seen_etags()[2], None);
}
