//! Build runner: one release-mode toolchain invocation per matrix entry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, ShipError};
use crate::matrix::MatrixEntry;

/// Lines of stderr kept in a build failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Produces a raw artifact for one matrix entry.
///
/// Implementations do not retry. A returned path is where the toolchain is
/// known to emit the artifact; whether the file exists is checked later by
/// the normalizer.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn build(&self, entry: &MatrixEntry, lib: &str) -> Result<PathBuf>;
}

/// Builds with `cargo build --release --target <triple>`.
///
/// Symbols are always stripped through `CARGO_PROFILE_RELEASE_STRIP`, so the
/// artifact is ready to publish as soon as the build exits.
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    workspace: PathBuf,
    target_dir: PathBuf,
    cargo: String,
}

impl CargoToolchain {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let target_dir = workspace.join("target");
        Self {
            workspace,
            target_dir,
            cargo: "cargo".to_string(),
        }
    }

    /// Override the cargo target directory.
    pub fn with_target_dir(mut self, target_dir: impl Into<PathBuf>) -> Self {
        self.target_dir = target_dir.into();
        self
    }

    /// Use a different cargo executable.
    pub fn with_cargo(mut self, cargo: &str) -> Self {
        self.cargo = cargo.to_string();
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Where the toolchain leaves the raw artifact for `entry`.
    pub fn raw_artifact_path(&self, entry: &MatrixEntry, lib: &str) -> PathBuf {
        self.target_dir
            .join(&entry.target)
            .join("release")
            .join(entry.raw_file_name(lib))
    }

    /// Arguments passed to cargo for `entry`.
    pub fn build_args(entry: &MatrixEntry) -> Vec<String> {
        let mut args = Vec::new();
        if !entry.toolchain.is_empty() {
            args.push(format!("+{}", entry.toolchain));
        }
        args.extend(
            ["build", "--release", "--target", entry.target.as_str()]
                .iter()
                .map(|s| s.to_string()),
        );
        args.extend(entry.extra_flags.iter().cloned());
        args
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl Toolchain for CargoToolchain {
    async fn build(&self, entry: &MatrixEntry, lib: &str) -> Result<PathBuf> {
        let start = Instant::now();
        let args = Self::build_args(entry);
        info!(platform = %entry.platform, target = %entry.target, "Building");
        debug!(cargo = %self.cargo, ?args, "Toolchain command");

        // kill_on_drop: a timed-out or cancelled build must not linger.
        let child = Command::new(&self.cargo)
            .args(&args)
            .current_dir(&self.workspace)
            .env("CARGO_TARGET_DIR", &self.target_dir)
            .env("CARGO_PROFILE_RELEASE_STRIP", "symbols")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShipError::ToolchainBuild {
                platform: entry.platform.clone(),
                reason: format!("failed to spawn {}: {e}", self.cargo),
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ShipError::ToolchainBuild {
                platform: entry.platform.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(ShipError::ToolchainBuild {
                platform: entry.platform.clone(),
                reason: format!("exit code {code}: {}", stderr_tail(&output.stderr)),
            });
        }

        info!(
            platform = %entry.platform,
            duration_ms = start.elapsed().as_millis() as u64,
            "Build finished"
        );
        Ok(self.raw_artifact_path(entry, lib))
    }
}
