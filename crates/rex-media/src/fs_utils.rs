//! Artifact finalization helpers.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{MediaError, MediaResult};

const HASH_CHUNK: usize = 64 * 1024;

/// `sha256:<hex>` digest of a file's contents.
pub async fn sha256_file(path: impl AsRef<Path>) -> MediaResult<String> {
    let path = path.as_ref();
    let mut file = fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MediaError::FileNotFound(path.to_path_buf()),
        _ => MediaError::from(e),
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Size of a file in bytes.
pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    Ok(fs::metadata(path).await?.len())
}

/// Move a finished temp file over its final name.
///
/// Both paths live in the same directory, so the rename is atomic and
/// replaces any artifact left by an earlier delivery of the same job.
pub async fn promote(tmp: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let tmp = tmp.as_ref();
    let dst = dst.as_ref();
    fs::rename(tmp, dst).await.map_err(|e| {
        tracing::error!(
            "Failed to promote {} -> {}: {}",
            tmp.display(),
            dst.display(),
            e
        );
        MediaError::from(e)
    })
}

/// Best-effort removal of a leftover temp file.
pub async fn remove_if_exists(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
