//! Release run: version, matrix fan-out, release barrier, report.
//!
//! Each matrix entry runs its own build → normalize → publish chain in a
//! `JoinSet`. The release is created concurrently with the builds and handed
//! to the chains through a `watch` gate; no chain uploads before the gate
//! opens. One entry failing never affects another. Release creation failing
//! closes the gate, cancels every chain and fails the whole run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::build::Toolchain;
use crate::cancel::{cancel_pair, CancelSignal};
use crate::config::{render_release_name, PipelineConfig, Timeouts};
use crate::error::{Result, ShipError};
use crate::matrix::{MatrixEntry, TargetMatrix};
use crate::metrics::METRICS;
use crate::normalize::normalize;
use crate::obs;
use crate::publish::{ReleaseHandle, ReleasePublisher};
use crate::report::{EntryOutcome, EntryStatus, RunReport, Stage};
use crate::version::{resolve_version, ResolvedVersion};

/// Optional per-stage time limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimeouts {
    pub build: Option<Duration>,
    pub create: Option<Duration>,
    pub upload: Option<Duration>,
}

impl From<Timeouts> for StageTimeouts {
    fn from(t: Timeouts) -> Self {
        Self {
            build: t.build(),
            create: t.create(),
            upload: t.upload(),
        }
    }
}

/// Per-run settings that are not part of the matrix.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub library: String,
    pub out_dir: PathBuf,
    /// Release title template over `{version}` and `{lib}`.
    pub release_name: String,
    pub timeouts: StageTimeouts,
}

impl RunOptions {
    pub fn new(library: &str, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            library: library.to_string(),
            out_dir: out_dir.into(),
            release_name: "{version}".to_string(),
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, library: &str) -> Self {
        Self {
            library: library.to_string(),
            out_dir: config.out_dir.clone(),
            release_name: config.release_name.clone(),
            timeouts: config.timeouts.into(),
        }
    }
}

/// State of the release barrier.
#[derive(Debug, Clone)]
enum Gate {
    Pending,
    Open(ReleaseHandle),
    Closed,
}

/// Why a chain stopped early.
enum ChainStop {
    Failed(ShipError),
    Cancelled,
}

/// Everything a chain task needs, shared across entries.
struct ChainContext {
    toolchain: Arc<dyn Toolchain>,
    publisher: Arc<ReleasePublisher>,
    library: String,
    out_dir: PathBuf,
    timeouts: StageTimeouts,
}

async fn with_timeout<T>(
    stage: &str,
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ShipError::Timeout {
                stage: stage.to_string(),
                secs: limit.as_secs(),
            })?,
        None => fut.await,
    }
}

/// Run one stage under its time limit, racing cancellation.
async fn staged<T>(
    stage: Stage,
    limit: Option<Duration>,
    cancel: &mut CancelSignal,
    fut: impl Future<Output = Result<T>>,
) -> std::result::Result<T, ChainStop> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChainStop::Cancelled),
        result = with_timeout(stage.name(), limit, fut) => result.map_err(ChainStop::Failed),
    }
}

fn stopped(
    entry: &MatrixEntry,
    canonical_name: String,
    stage: Stage,
    stop: ChainStop,
    started: Instant,
) -> EntryOutcome {
    let status = match stop {
        ChainStop::Failed(e) => {
            obs::emit_entry_failed(&entry.platform, stage, &e);
            EntryStatus::Failed {
                stage,
                error: e.to_string(),
            }
        }
        ChainStop::Cancelled => {
            info!(platform = %entry.platform, stage = %stage, "Entry cancelled");
            EntryStatus::Cancelled { stage }
        }
    };
    EntryOutcome {
        platform: entry.platform.clone(),
        canonical_name,
        status,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn run_entry(
    ctx: Arc<ChainContext>,
    entry: MatrixEntry,
    mut gate: watch::Receiver<Gate>,
    mut cancel: CancelSignal,
) -> EntryOutcome {
    let started = Instant::now();
    let canonical_name = entry.canonical_file_name(&ctx.library);

    let stage_start = Instant::now();
    let raw = match staged(
        Stage::Build,
        ctx.timeouts.build,
        &mut cancel,
        ctx.toolchain.build(&entry, &ctx.library),
    )
    .await
    {
        Ok(raw) => {
            METRICS.inc_builds_succeeded();
            raw
        }
        Err(stop) => {
            if matches!(stop, ChainStop::Failed(_)) {
                METRICS.inc_builds_failed();
            }
            return stopped(&entry, canonical_name, Stage::Build, stop, started);
        }
    };
    obs::emit_stage_finished(
        &entry.platform,
        Stage::Build,
        stage_start.elapsed().as_millis() as u64,
    );

    let stage_start = Instant::now();
    let artifact = match staged(
        Stage::Normalize,
        None,
        &mut cancel,
        normalize(&raw, &ctx.out_dir, &canonical_name),
    )
    .await
    {
        Ok(artifact) => artifact,
        Err(stop) => return stopped(&entry, canonical_name, Stage::Normalize, stop, started),
    };
    obs::emit_stage_finished(
        &entry.platform,
        Stage::Normalize,
        stage_start.elapsed().as_millis() as u64,
    );

    let release = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        ready = gate.wait_for(|g| !matches!(g, Gate::Pending)) => match ready.as_deref() {
            Ok(Gate::Open(handle)) => Some(handle.clone()),
            _ => None,
        },
    };
    let Some(release) = release else {
        return stopped(&entry, canonical_name, Stage::Publish, ChainStop::Cancelled, started);
    };

    let stage_start = Instant::now();
    match staged(
        Stage::Publish,
        ctx.timeouts.upload,
        &mut cancel,
        ctx.publisher.publish(&release, &artifact),
    )
    .await
    {
        Ok(assets) => {
            obs::emit_stage_finished(
                &entry.platform,
                Stage::Publish,
                stage_start.elapsed().as_millis() as u64,
            );
            EntryOutcome {
                platform: entry.platform.clone(),
                canonical_name,
                status: EntryStatus::Published {
                    assets,
                    digest: artifact.digest.clone(),
                },
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
        Err(stop) => stopped(&entry, canonical_name, Stage::Publish, stop, started),
    }
}

/// Drives a full release run over a target matrix.
pub struct ReleaseOrchestrator {
    toolchain: Arc<dyn Toolchain>,
    publisher: Arc<ReleasePublisher>,
    matrix: TargetMatrix,
    options: RunOptions,
}

impl ReleaseOrchestrator {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        publisher: Arc<ReleasePublisher>,
        matrix: TargetMatrix,
        options: RunOptions,
    ) -> Self {
        Self {
            toolchain,
            publisher,
            matrix,
            options,
        }
    }

    pub fn matrix(&self) -> &TargetMatrix {
        &self.matrix
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the pipeline for the manifest text `manifest`.
    ///
    /// Returns `Err` only for run-global failures: an unreadable version, an
    /// invalid matrix, release creation failing or being cancelled. Per-entry
    /// failures are recorded in the report.
    pub async fn run(&self, manifest: &str, cancel: CancelSignal) -> Result<RunReport> {
        let version = resolve_version(manifest)?;
        self.matrix.validate(&self.options.library)?;

        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, version.version.as_str());
        self.run_resolved(run_id, version, cancel)
            .instrument(span)
            .await
    }

    async fn run_resolved(
        &self,
        run_id: String,
        version: ResolvedVersion,
        cancel: CancelSignal,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_run_started(
            &run_id,
            version.version.as_str(),
            version.prerelease,
            self.matrix.len(),
        );

        // Chains listen on an internal signal so a failed release creation
        // can stop them without touching the caller's canceller.
        let (chain_canceller, chain_cancel) = cancel_pair();
        let forwarder = {
            let chain_canceller = chain_canceller.clone();
            let mut outer = cancel.clone();
            tokio::spawn(async move {
                outer.cancelled().await;
                chain_canceller.cancel();
            })
        };

        let (gate_tx, gate_rx) = watch::channel(Gate::Pending);
        let ctx = Arc::new(ChainContext {
            toolchain: Arc::clone(&self.toolchain),
            publisher: Arc::clone(&self.publisher),
            library: self.options.library.clone(),
            out_dir: self.options.out_dir.clone(),
            timeouts: self.options.timeouts,
        });

        let mut chains = JoinSet::new();
        for (index, entry) in self.matrix.entries().iter().cloned().enumerate() {
            let ctx = Arc::clone(&ctx);
            let gate = gate_rx.clone();
            let cancel = chain_cancel.clone();
            chains.spawn(
                async move { (index, run_entry(ctx, entry, gate, cancel).await) }
                    .in_current_span(),
            );
        }

        let display_name =
            render_release_name(&self.options.release_name, &version, &self.options.library);
        let mut outer = cancel.clone();
        let created = tokio::select! {
            biased;
            _ = outer.cancelled() => Err(ShipError::Cancelled),
            result = with_timeout(
                "release creation",
                self.options.timeouts.create,
                self.publisher.ensure_release(&version, &display_name),
            ) => result,
        };

        let release = match created {
            Ok(handle) => {
                obs::emit_release_ready(&handle.tag, handle.id.0, handle.created);
                gate_tx.send_replace(Gate::Open(handle.clone()));
                handle
            }
            Err(e) => {
                warn!(error = %e, "Release unavailable, cancelling run");
                gate_tx.send_replace(Gate::Closed);
                chain_canceller.cancel();
                while chains.join_next().await.is_some() {}
                forwarder.abort();
                return Err(e);
            }
        };

        let mut slots: Vec<Option<EntryOutcome>> = vec![None; self.matrix.len()];
        while let Some(joined) = chains.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Entry task did not complete"),
            }
        }
        forwarder.abort();

        let entries: Vec<EntryOutcome> = slots
            .into_iter()
            .zip(self.matrix.entries())
            .map(|(slot, entry)| {
                slot.unwrap_or_else(|| EntryOutcome {
                    platform: entry.platform.clone(),
                    canonical_name: entry.canonical_file_name(&self.options.library),
                    status: EntryStatus::Failed {
                        stage: Stage::Build,
                        error: "entry task aborted".to_string(),
                    },
                    duration_ms: 0,
                })
            })
            .collect();

        let report = RunReport {
            run_id,
            version,
            release,
            entries,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        METRICS.flush();
        obs::emit_run_finished(
            &report.run_id,
            report.duration_ms,
            report.succeeded_count(),
            report.failed_count(),
        );
        Ok(report)
    }
}
