//! Structured lifecycle events for release runs.
//!
//! Every function emits one `tracing` event with a stable `event` field so
//! log pipelines can key on it.

use tracing::{info, warn, Span};

use crate::report::Stage;

/// Span covering one release run; attach with `Instrument::instrument`.
pub fn run_span(run_id: &str, version: &str) -> Span {
    tracing::info_span!("shipwright.run", run_id = %run_id, version = %version)
}

pub fn emit_run_started(run_id: &str, version: &str, prerelease: bool, entries: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        version = %version,
        prerelease = prerelease,
        entries = entries,
    );
}

pub fn emit_release_ready(tag: &str, release_id: u64, created: bool) {
    info!(event = "release.ready", tag = %tag, release_id = release_id, created = created);
}

pub fn emit_stage_finished(platform: &str, stage: Stage, duration_ms: u64) {
    info!(
        event = "entry.stage_finished",
        platform = %platform,
        stage = %stage,
        duration_ms = duration_ms,
    );
}

/// Failures are warnings: one entry failing does not stop the run.
pub fn emit_entry_failed(platform: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "entry.failed", platform = %platform, stage = %stage, error = %error);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, succeeded: usize, failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
    );
}
