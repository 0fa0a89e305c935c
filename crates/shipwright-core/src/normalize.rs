//! Artifact normalization: canonical naming plus a SHA-256 sidecar.
//!
//! Normalizing is safe to repeat. Passing the canonical file itself skips the
//! rename; the sidecar is rewritten every time from the canonical file's
//! current bytes. A missing raw file is always `ArtifactNotFound`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::{Result, ShipError};

/// Extension appended to the canonical name for the digest sidecar.
pub const DIGEST_EXTENSION: &str = "sha256";

const READ_BUF_SIZE: usize = 64 * 1024;

/// An artifact under its canonical name with a fresh digest sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedArtifact {
    pub canonical_name: String,
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the artifact bytes.
    pub digest: String,
    pub digest_path: PathBuf,
}

impl NormalizedArtifact {
    /// File name of the digest sidecar.
    pub fn digest_file_name(&self) -> String {
        digest_file_name(&self.canonical_name)
    }
}

/// `<canonical name>.sha256`
pub fn digest_file_name(canonical_name: &str) -> String {
    format!("{canonical_name}.{DIGEST_EXTENSION}")
}

/// Lowercase hex SHA-256 of a file, streamed.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let digest_err = |source| ShipError::DigestComputation {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::open(path).await.map_err(digest_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(digest_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of in-memory bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Move `from` to `to`, copying when a plain rename is not possible.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            warn!(
                from = %from.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
            Ok(())
        }
    }
}

/// Rename `raw_path` to `<out_dir>/<canonical_name>` and write its sidecar.
pub async fn normalize(
    raw_path: &Path,
    out_dir: &Path,
    canonical_name: &str,
) -> Result<NormalizedArtifact> {
    let canonical_path = out_dir.join(canonical_name);
    let raw_present = exists(raw_path).await;

    // A canonical file left over from an earlier run never stands in for a
    // missing raw artifact.
    if raw_present && same_file(raw_path, &canonical_path).await {
        debug!(artifact = %canonical_name, "Already canonical, skipping rename");
    } else if raw_present {
        fs::create_dir_all(out_dir).await?;
        move_file(raw_path, &canonical_path).await?;
        info!(
            from = %raw_path.display(),
            to = %canonical_path.display(),
            "Renamed artifact"
        );
    } else {
        return Err(ShipError::ArtifactNotFound {
            path: raw_path.to_path_buf(),
        });
    }

    let digest = sha256_file(&canonical_path).await?;
    let digest_path = out_dir.join(digest_file_name(canonical_name));
    fs::write(&digest_path, digest.as_bytes())
        .await
        .map_err(|source| ShipError::DigestComputation {
            path: digest_path.clone(),
            source,
        })?;

    Ok(NormalizedArtifact {
        canonical_name: canonical_name.to_string(),
        path: canonical_path,
        digest,
        digest_path,
    })
}
