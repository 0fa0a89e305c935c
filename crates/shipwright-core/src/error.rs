//! Error taxonomy for the release orchestrator.

use std::path::PathBuf;

use shipwright_store::StoreError;

/// Shipwright errors.
///
/// `ManifestParse`, `InvalidMatrix`, `Config` and `ReleaseCreationConflict`
/// are run-global. The build, normalize and upload variants only ever fail
/// the matrix entry they occurred in.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    #[error("invalid target matrix: {0}")]
    InvalidMatrix(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("toolchain build failed for {platform}: {reason}")]
    ToolchainBuild { platform: String, reason: String },

    #[error("artifact not found at {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("digest computation failed for {}: {source}", path.display())]
    DigestComputation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("release already exists for tag {tag}")]
    ReleaseCreationConflict { tag: String },

    #[error("release creation failed for tag {tag}: {source}")]
    ReleaseCreation {
        tag: String,
        #[source]
        source: StoreError,
    },

    #[error("upload of {asset} failed: {reason}")]
    AssetUpload { asset: String, reason: String },

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, ShipError>;
