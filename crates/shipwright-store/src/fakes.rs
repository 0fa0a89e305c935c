//! In-memory release store (tests and dry runs)
//!
//! `MemoryReleaseStore` satisfies the `ReleaseStore` contract without any
//! network access, keeps the uploaded bytes so callers can inspect them, and
//! can be told to fail specific operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::store::*;

#[derive(Debug)]
struct StoredRelease {
    record: ReleaseRecord,
    /// Asset bytes keyed by name; order lives in `record.assets`.
    contents: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    releases: Vec<StoredRelease>,
    create_calls: usize,
    upload_calls: usize,
    failing_assets: HashSet<String>,
    fail_create: bool,
}

/// In-memory release store backed by a `Vec` of releases.
#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    state: Mutex<State>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every upload of `file_name` fail.
    pub fn fail_uploads_for(&self, file_name: &str) {
        self.lock().failing_assets.insert(file_name.to_string());
    }

    /// Make `create_release` fail with a transport error.
    pub fn fail_create(&self) {
        self.lock().fail_create = true;
    }

    /// Seed a pre-existing release, as if left over from an earlier run.
    pub fn seed_release(&self, release: &NewRelease) -> ReleaseId {
        let mut state = self.lock();
        insert_release(&mut state, release)
    }

    /// Bytes currently stored under `file_name`, if any.
    pub fn asset_bytes(&self, id: ReleaseId, file_name: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state
            .releases
            .iter()
            .find(|r| r.record.id == id)
            .and_then(|r| r.contents.get(file_name).cloned())
    }

    /// All releases currently held.
    pub fn releases(&self) -> Vec<ReleaseRecord> {
        self.lock().releases.iter().map(|r| r.record.clone()).collect()
    }

    /// Number of `create_release` calls received (including rejected ones).
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Number of `attach_asset` calls received (including failed ones).
    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }
}

fn insert_release(state: &mut State, release: &NewRelease) -> ReleaseId {
    state.next_id += 1;
    let id = ReleaseId(state.next_id);
    state.releases.push(StoredRelease {
        record: ReleaseRecord {
            id,
            tag: release.tag.clone(),
            display_name: release.display_name.clone(),
            prerelease: release.prerelease,
            assets: Vec::new(),
            created_at: Utc::now(),
        },
        contents: HashMap::new(),
    });
    id
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn create_release(&self, release: &NewRelease) -> StoreResult<ReleaseId> {
        let mut state = self.lock();
        state.create_calls += 1;
        if state.fail_create {
            return Err(StoreError::Injected(format!(
                "create_release({}) rejected",
                release.tag
            )));
        }
        if state.releases.iter().any(|r| r.record.tag == release.tag) {
            return Err(StoreError::AlreadyExists {
                tag: release.tag.clone(),
            });
        }
        Ok(insert_release(&mut state, release))
    }

    async fn find_release(&self, tag: &str) -> StoreResult<Option<ReleaseId>> {
        let state = self.lock();
        Ok(state
            .releases
            .iter()
            .find(|r| r.record.tag == tag)
            .map(|r| r.record.id))
    }

    async fn get_release(&self, id: ReleaseId) -> StoreResult<ReleaseRecord> {
        let state = self.lock();
        state
            .releases
            .iter()
            .find(|r| r.record.id == id)
            .map(|r| r.record.clone())
            .ok_or(StoreError::ReleaseNotFound { id: id.0 })
    }

    async fn attach_asset(
        &self,
        id: ReleaseId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.upload_calls += 1;
        if state.failing_assets.contains(file_name) {
            return Err(StoreError::Injected(format!("upload of {file_name} rejected")));
        }
        let release = state
            .releases
            .iter_mut()
            .find(|r| r.record.id == id)
            .ok_or(StoreError::ReleaseNotFound { id: id.0 })?;
        if release.contents.insert(file_name.to_string(), bytes).is_none() {
            release.record.assets.push(file_name.to_string());
        }
        Ok(())
    }

    async fn list_assets(&self, id: ReleaseId) -> StoreResult<Vec<AssetRecord>> {
        let state = self.lock();
        let release = state
            .releases
            .iter()
            .find(|r| r.record.id == id)
            .ok_or(StoreError::ReleaseNotFound { id: id.0 })?;
        Ok(release
            .record
            .assets
            .iter()
            .map(|name| AssetRecord {
                name: name.clone(),
                size: release.contents.get(name).map_or(0, |b| b.len() as u64),
            })
            .collect())
    }
}
