//! Release store trait definitions
//!
//! A release store hosts tagged releases and the binary assets attached to
//! them. The contract the orchestrator relies on:
//! - `create_release` creates at most one release per tag and reports
//!   `StoreError::AlreadyExists` otherwise.
//! - `attach_asset` is keyed by file name: attaching a name twice leaves
//!   exactly one asset with the latest bytes.
//!
//! An in-memory fake is provided in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-assigned identifier of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseId(pub u64);

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for creating a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelease {
    /// Tag the release is published under (the resolved version)
    pub tag: String,
    /// Human-readable release title
    pub display_name: String,
    /// Whether the release is flagged as a pre-release
    pub prerelease: bool,
}

/// A single asset attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Asset file name (unique within its release)
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// A release as seen by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: ReleaseId,
    pub tag: String,
    pub display_name: String,
    pub prerelease: bool,
    /// Attached asset names in attach order
    pub assets: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Release hosting backend.
///
/// Semantics:
/// - A release transitions Absent → Created exactly once per tag.
/// - Created releases are never deleted or recreated through this trait.
/// - Uploads for disjoint asset names may run concurrently.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Create a release. Fails with `AlreadyExists` if the tag is taken.
    async fn create_release(&self, release: &NewRelease) -> StoreResult<ReleaseId>;

    /// Look up a release by tag.
    async fn find_release(&self, tag: &str) -> StoreResult<Option<ReleaseId>>;

    /// Fetch a release record by id.
    async fn get_release(&self, id: ReleaseId) -> StoreResult<ReleaseRecord>;

    /// Attach `bytes` under `file_name`, replacing any asset with that name.
    async fn attach_asset(&self, id: ReleaseId, file_name: &str, bytes: Vec<u8>)
        -> StoreResult<()>;

    /// List assets attached to a release.
    async fn list_assets(&self, id: ReleaseId) -> StoreResult<Vec<AssetRecord>>;
}
