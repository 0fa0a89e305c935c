//! End-to-end release runs against a stub toolchain and the in-memory store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shipwright_core::normalize::sha256_bytes;
use shipwright_core::{
    cancel_pair, EntryStatus, ExistingReleasePolicy, MatrixEntry, ReleaseOrchestrator,
    ReleasePublisher, RunOptions, ShipError, Stage, TargetMatrix, Toolchain,
};
use shipwright_store::{MemoryReleaseStore, ReleaseStore};

const LIB: &str = "testangel_oracle";

fn manifest(version: &str) -> String {
    format!("[package]\nname = \"testangel-oracle\"\nversion = \"{version}\"\nedition = \"2021\"\n")
}

/// Writes `<payload><platform>` to a per-target raw path.
struct StubToolchain {
    raw_root: PathBuf,
    payload: Vec<u8>,
    fail: HashSet<String>,
    hang: bool,
    write: bool,
    builds: AtomicUsize,
}

impl StubToolchain {
    fn new(raw_root: &Path, payload: &[u8]) -> Self {
        Self {
            raw_root: raw_root.to_path_buf(),
            payload: payload.to_vec(),
            fail: HashSet::new(),
            hang: false,
            write: true,
            builds: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, platform: &str) -> Self {
        self.fail.insert(platform.to_string());
        self
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Report success without emitting a raw file.
    fn without_output(mut self) -> Self {
        self.write = false;
        self
    }

    fn bytes_for(&self, platform: &str) -> Vec<u8> {
        let mut bytes = self.payload.clone();
        bytes.extend_from_slice(platform.as_bytes());
        bytes
    }
}

#[async_trait]
impl Toolchain for StubToolchain {
    async fn build(&self, entry: &MatrixEntry, lib: &str) -> shipwright_core::Result<PathBuf> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail.contains(&entry.platform) {
            return Err(ShipError::ToolchainBuild {
                platform: entry.platform.clone(),
                reason: "exit code 101: linker `link.exe` not found".to_string(),
            });
        }
        let dir = self.raw_root.join(&entry.target);
        let path = dir.join(entry.raw_file_name(lib));
        if self.write {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, self.bytes_for(&entry.platform)).await?;
        }
        Ok(path)
    }
}

fn orchestrator(
    dir: &Path,
    toolchain: Arc<StubToolchain>,
    store: Arc<MemoryReleaseStore>,
    policy: ExistingReleasePolicy,
) -> ReleaseOrchestrator {
    let publisher = Arc::new(ReleasePublisher::new(store, policy));
    let mut options = RunOptions::new(LIB, dir.join("dist"));
    options.release_name = "{lib} {version}".to_string();
    ReleaseOrchestrator::new(toolchain, publisher, TargetMatrix::default(), options)
}

#[tokio::test]
async fn four_entries_publish_one_release_with_eight_assets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"build-1:"));
    let orch = orchestrator(
        dir.path(),
        toolchain.clone(),
        store.clone(),
        ExistingReleasePolicy::Fail,
    );
    let (_canceller, signal) = cancel_pair();

    let report = orch.run(&manifest("2.0.0"), signal).await.expect("run");

    assert!(report.success());
    assert_eq!(report.succeeded_count(), 4);
    assert!(!report.version.prerelease);
    assert!(report.release.created);

    let releases = store.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag, "2.0.0");
    assert_eq!(releases[0].display_name, "testangel_oracle 2.0.0");
    assert!(!releases[0].prerelease);

    let assets: HashSet<String> = releases[0].assets.iter().cloned().collect();
    assert_eq!(assets.len(), 8);
    for name in [
        "libtestangel_oracle-linux-amd64.so",
        "testangel_oracle-amd64.dll",
        "libtestangel_oracle-darwin-amd64.dylib",
        "libtestangel_oracle-darwin-arm64.dylib",
    ] {
        assert!(assets.contains(name), "missing {name}");
        assert!(assets.contains(&format!("{name}.sha256")), "missing digest for {name}");
    }

    let linux = store
        .asset_bytes(report.release.id, "libtestangel_oracle-linux-amd64.so")
        .expect("linux artifact");
    assert_eq!(linux, toolchain.bytes_for("linux-amd64"));
    let digest = store
        .asset_bytes(report.release.id, "libtestangel_oracle-linux-amd64.so.sha256")
        .expect("linux digest");
    assert_eq!(digest, sha256_bytes(&linux).into_bytes());

    assert!(dir
        .path()
        .join("dist/libtestangel_oracle-darwin-arm64.dylib.sha256")
        .exists());
}

#[tokio::test]
async fn prerelease_version_marks_release() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"rc:"));
    let orch = orchestrator(dir.path(), toolchain, store.clone(), ExistingReleasePolicy::Fail);
    let (_canceller, signal) = cancel_pair();

    let report = orch.run(&manifest("1.2.3-beta.1"), signal).await.expect("run");

    assert!(report.version.prerelease);
    let record = store.get_release(report.release.id).await.expect("release");
    assert_eq!(record.tag, "1.2.3-beta.1");
    assert!(record.prerelease);
}

#[tokio::test]
async fn windows_build_failure_leaves_other_entries_published() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    let toolchain =
        Arc::new(StubToolchain::new(&dir.path().join("raw"), b"x:").failing("windows-amd64"));
    let orch = orchestrator(dir.path(), toolchain, store.clone(), ExistingReleasePolicy::Fail);
    let (_canceller, signal) = cancel_pair();

    let report = orch.run(&manifest("2.0.0"), signal).await.expect("run");

    assert!(!report.success());
    assert_eq!(report.failed_count(), 1);
    let windows = report.entry("windows-amd64").expect("windows entry");
    assert_eq!(windows.failed_stage(), Some(Stage::Build));
    for platform in ["linux-amd64", "darwin-amd64", "darwin-arm64"] {
        assert!(report.entry(platform).expect("entry").published(), "{platform}");
    }

    let assets = store.list_assets(report.release.id).await.expect("assets");
    assert_eq!(assets.len(), 6);
    assert!(assets.iter().all(|a| !a.name.ends_with(".dll")
        && !a.name.ends_with(".dll.sha256")));
}

#[tokio::test]
async fn upload_failure_marks_only_that_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    store.fail_uploads_for("libtestangel_oracle-darwin-amd64.dylib.sha256");
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"x:"));
    let orch = orchestrator(dir.path(), toolchain, store.clone(), ExistingReleasePolicy::Fail);
    let (_canceller, signal) = cancel_pair();

    let report = orch.run(&manifest("2.0.0"), signal).await.expect("run");

    assert_eq!(report.failed_count(), 1);
    let darwin = report.entry("darwin-amd64").expect("entry");
    match &darwin.status {
        EntryStatus::Failed { stage, error } => {
            assert_eq!(*stage, Stage::Publish);
            assert!(error.contains("darwin-amd64.dylib.sha256"));
        }
        other => panic!("unexpected status {other:?}"),
    }
    // The artifact itself was uploaded and stays attached.
    assert!(store
        .asset_bytes(report.release.id, "libtestangel_oracle-darwin-amd64.dylib")
        .is_some());
}

#[tokio::test]
async fn rerun_with_reuse_overwrites_assets_by_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());

    let first = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"first:"));
    let orch = orchestrator(dir.path(), first, store.clone(), ExistingReleasePolicy::Reuse);
    let (_canceller, signal) = cancel_pair();
    let report = orch.run(&manifest("2.0.0"), signal.clone()).await.expect("first run");
    assert!(report.release.created);

    let second = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"second:"));
    let orch = orchestrator(
        dir.path(),
        second.clone(),
        store.clone(),
        ExistingReleasePolicy::Reuse,
    );
    let rerun = orch.run(&manifest("2.0.0"), signal).await.expect("second run");

    assert!(rerun.success());
    assert!(!rerun.release.created);
    assert_eq!(rerun.release.id, report.release.id);

    let releases = store.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].assets.len(), 8);

    let dll = store
        .asset_bytes(rerun.release.id, "testangel_oracle-amd64.dll")
        .expect("dll");
    assert_eq!(dll, second.bytes_for("windows-amd64"));
    let digest = store
        .asset_bytes(rerun.release.id, "testangel_oracle-amd64.dll.sha256")
        .expect("dll digest");
    assert_eq!(digest, sha256_bytes(&dll).into_bytes());
}

#[tokio::test]
async fn missing_raw_artifact_never_publishes_stale_canonical_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());

    let first = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"v1-bytes:"));
    let orch = orchestrator(dir.path(), first, store.clone(), ExistingReleasePolicy::Fail);
    let (_canceller, signal) = cancel_pair();
    orch.run(&manifest("1.0.0"), signal.clone()).await.expect("1.0.0 run");
    assert!(dir
        .path()
        .join("dist/libtestangel_oracle-linux-amd64.so")
        .exists());

    // Builds "succeed" but emit nothing; dist/ still holds the 1.0.0 files.
    let broken = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"v2-bytes:").without_output());
    let orch = orchestrator(dir.path(), broken, store.clone(), ExistingReleasePolicy::Fail);
    let report = orch.run(&manifest("2.0.0"), signal).await.expect("2.0.0 run");

    assert_eq!(report.failed_count(), 4);
    for entry in &report.entries {
        match &entry.status {
            EntryStatus::Failed { stage, error } => {
                assert_eq!(*stage, Stage::Normalize, "{}", entry.platform);
                assert!(error.contains("artifact not found"), "{error}");
            }
            other => panic!("{} unexpectedly {other:?}", entry.platform),
        }
    }

    let assets = store.list_assets(report.release.id).await.expect("assets");
    assert!(assets.is_empty(), "2.0.0 must not carry 1.0.0 binaries");
}

#[tokio::test]
async fn existing_release_under_fail_policy_aborts_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"x:"));

    let orch = orchestrator(
        dir.path(),
        toolchain.clone(),
        store.clone(),
        ExistingReleasePolicy::Fail,
    );
    let (_canceller, signal) = cancel_pair();
    orch.run(&manifest("2.0.0"), signal.clone()).await.expect("first run");
    let uploads_after_first = store.upload_calls();

    let err = orch
        .run(&manifest("2.0.0"), signal)
        .await
        .expect_err("tag already released");
    assert!(matches!(err, ShipError::ReleaseCreationConflict { ref tag } if tag == "2.0.0"));
    assert_eq!(store.releases().len(), 1);
    assert_eq!(store.upload_calls(), uploads_after_first);
}

#[tokio::test]
async fn release_creation_failure_uploads_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    store.fail_create();
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"x:"));
    let orch = orchestrator(dir.path(), toolchain, store.clone(), ExistingReleasePolicy::Fail);
    let (_canceller, signal) = cancel_pair();

    let err = orch.run(&manifest("2.0.0"), signal).await.expect_err("store down");
    assert!(matches!(err, ShipError::ReleaseCreation { .. }));
    assert_eq!(store.upload_calls(), 0);
    assert!(store.releases().is_empty());
}

#[tokio::test]
async fn cancellation_stops_in_flight_builds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryReleaseStore::new());
    let toolchain = Arc::new(StubToolchain::new(&dir.path().join("raw"), b"x:").hanging());
    let orch = orchestrator(
        dir.path(),
        toolchain.clone(),
        store.clone(),
        ExistingReleasePolicy::Fail,
    );
    let (canceller, signal) = cancel_pair();

    let run = tokio::spawn(async move { orch.run(&manifest("2.0.0"), signal).await });
    while toolchain.builds.load(Ordering::SeqCst) < 4 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    canceller.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run stops after cancel")
        .expect("join")
        .expect("report");

    assert!(report.cancelled());
    assert_eq!(report.succeeded_count(), 0);
    assert!(report
        .entries
        .iter()
        .all(|e| e.status == EntryStatus::Cancelled { stage: Stage::Build }));
    assert_eq!(store.upload_calls(), 0);
}
