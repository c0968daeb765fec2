//! Filesystem helpers shared by the cache and manifest layers

use std::io;
use std::path::Path;
use uuid::Uuid;

/// Writes bytes to a sibling temp file, then renames over the target
///
/// Readers observe either the old content or the new content, never a
/// partial write. The temp file lives in the target's directory so the
/// rename stays on one filesystem.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "target path has no parent")
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;

    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // Windows refuses to rename over an existing file; replace it.
            let _ = tokio::fs::remove_file(path).await;
            match tokio::fs::rename(&tmp, path).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    Err(err)
                }
            }
        }
    }
}
