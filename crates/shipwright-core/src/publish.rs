//! Release publishing: create the tagged release once, then attach assets.
//!
//! Assets are addressed by file name. Attaching a name that already exists
//! replaces its bytes; nothing is ever deleted on failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shipwright_store::{NewRelease, ReleaseId, ReleaseStore, StoreError};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{Result, ShipError};
use crate::metrics::METRICS;
use crate::normalize::NormalizedArtifact;
use crate::version::ResolvedVersion;

/// What to do when a release for the resolved tag already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingReleasePolicy {
    /// Abort the run with `ReleaseCreationConflict`.
    #[default]
    Fail,
    /// Attach this run's assets to the existing release.
    Reuse,
}

/// A release that exists in the store and can receive uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHandle {
    pub id: ReleaseId,
    pub tag: String,
    pub prerelease: bool,
    /// False when an existing release was reused.
    pub created: bool,
}

/// Thin layer over a release store enforcing create-once and upload-by-name.
pub struct ReleasePublisher {
    store: Arc<dyn ReleaseStore>,
    policy: ExistingReleasePolicy,
}

impl ReleasePublisher {
    pub fn new(store: Arc<dyn ReleaseStore>, policy: ExistingReleasePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> ExistingReleasePolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.store
    }

    /// Make sure a release exists for `version`.
    pub async fn ensure_release(
        &self,
        version: &ResolvedVersion,
        display_name: &str,
    ) -> Result<ReleaseHandle> {
        let tag = version.version.as_str().to_string();
        let request = NewRelease {
            tag: tag.clone(),
            display_name: display_name.to_string(),
            prerelease: version.prerelease,
        };

        match self.store.create_release(&request).await {
            Ok(id) => {
                info!(tag = %tag, release_id = %id, prerelease = version.prerelease, "Release created");
                Ok(ReleaseHandle {
                    id,
                    tag,
                    prerelease: version.prerelease,
                    created: true,
                })
            }
            Err(StoreError::AlreadyExists { .. }) => match self.policy {
                ExistingReleasePolicy::Fail => Err(ShipError::ReleaseCreationConflict { tag }),
                ExistingReleasePolicy::Reuse => {
                    let id = self
                        .store
                        .find_release(&tag)
                        .await
                        .map_err(|source| ShipError::ReleaseCreation {
                            tag: tag.clone(),
                            source,
                        })?
                        .ok_or_else(|| ShipError::ReleaseCreationConflict { tag: tag.clone() })?;
                    warn!(tag = %tag, release_id = %id, "Reusing existing release");
                    Ok(ReleaseHandle {
                        id,
                        tag,
                        prerelease: version.prerelease,
                        created: false,
                    })
                }
            },
            Err(source) => Err(ShipError::ReleaseCreation { tag, source }),
        }
    }

    /// Upload one file under `asset_name`.
    pub async fn upload(
        &self,
        release: &ReleaseHandle,
        asset_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let size = bytes.len();
        match self.store.attach_asset(release.id, asset_name, bytes).await {
            Ok(()) => {
                METRICS.inc_assets_uploaded();
                info!(asset = %asset_name, tag = %release.tag, size, "Asset attached");
                Ok(())
            }
            Err(e) => {
                METRICS.inc_upload_failures();
                Err(ShipError::AssetUpload {
                    asset: asset_name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Attach an artifact and its digest sidecar.
    ///
    /// Both uploads are attempted even if one fails; the first failure is
    /// returned. Nothing already uploaded is removed. Returns the asset names
    /// on success.
    pub async fn publish(
        &self,
        release: &ReleaseHandle,
        artifact: &NormalizedArtifact,
    ) -> Result<Vec<String>> {
        let artifact_bytes = fs::read(&artifact.path).await?;
        let digest_bytes = fs::read(&artifact.digest_path).await?;
        let digest_name = artifact.digest_file_name();

        let (artifact_result, digest_result) = futures::future::join(
            self.upload(release, &artifact.canonical_name, artifact_bytes),
            self.upload(release, &digest_name, digest_bytes),
        )
        .await;
        artifact_result?;
        digest_result?;

        Ok(vec![artifact.canonical_name.clone(), digest_name])
    }
}
