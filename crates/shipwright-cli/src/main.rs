//! Shipwright - release orchestration CLI
//!
//! The `shipwright` command builds a native library for every platform in the
//! target matrix and publishes the artifacts to one tagged release.
//!
//! ## Commands
//!
//! - `version`: Show the version and pre-release flag read from the manifest
//! - `matrix`: Show the effective target matrix with rendered file names
//! - `normalize`: Rename one raw artifact and write its digest sidecar
//! - `run`: Build, normalize and publish the whole matrix
//!
//! Exit codes for `run`: 0 when every entry published, 1 when any entry
//! failed, 2 for run-global failures.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

use shipwright_core::{
    cancel_pair, normalize, resolve_version_file, CargoToolchain, ExistingReleasePolicy,
    PipelineConfig, ReleaseOrchestrator, ReleasePublisher, RunOptions, RunReport,
};
use shipwright_store::{GitHubReleaseStore, MemoryReleaseStore, ReleaseStore};

const EXIT_ENTRY_FAILED: u8 = 1;
const EXIT_RUN_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-platform release orchestration for native libraries", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ./shipwright.toml when present)
    #[arg(short, long, global = true, env = "SHIPWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version declared in the manifest
    Version {
        /// Manifest path (overrides config)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Print the effective target matrix
    Matrix {
        /// Library base name (overrides config and manifest)
        #[arg(short, long)]
        lib: Option<String>,
    },

    /// Normalize a single raw artifact
    Normalize {
        /// Raw artifact produced by the toolchain
        #[arg(long)]
        raw: PathBuf,

        /// Canonical file name to publish under
        #[arg(long)]
        name: String,

        /// Output directory (overrides config)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Build, normalize and publish every matrix entry
    Run {
        /// Restrict the run to these platforms (repeatable)
        #[arg(long = "only", value_name = "PLATFORM")]
        only: Vec<String>,

        /// Attach to an existing release for the tag instead of failing
        #[arg(long)]
        reuse_existing: bool,

        /// Publish into an in-memory store instead of GitHub
        #[arg(long)]
        dry_run: bool,

        /// Write the JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Manifest path (overrides config)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Library base name (overrides config and manifest)
        #[arg(short, long)]
        lib: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipwright_core::telemetry::init_tracing(cli.json, level);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_RUN_FAILED)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = PipelineConfig::discover(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Version { manifest } => cmd_version(&config, manifest.as_deref()),
        Commands::Matrix { lib } => cmd_matrix(&config, lib.as_deref()),
        Commands::Normalize { raw, name, out_dir } => {
            cmd_normalize(&config, &raw, &name, out_dir.as_deref()).await
        }
        Commands::Run {
            only,
            reuse_existing,
            dry_run,
            report,
            manifest,
            lib,
        } => {
            let mut config = config;
            if let Some(manifest) = manifest {
                config.manifest = manifest;
            }
            if let Some(lib) = lib {
                config.library = Some(lib);
            }
            if reuse_existing {
                config.existing_release = ExistingReleasePolicy::Reuse;
            }
            cmd_run(&config, &only, dry_run, report.as_deref()).await
        }
    }
}

fn manifest_path(config: &PipelineConfig, manifest: Option<&Path>) -> PathBuf {
    manifest.map_or_else(|| config.manifest_path(), Path::to_path_buf)
}

fn read_manifest(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))
}

fn library_name(config: &PipelineConfig, lib: Option<&str>) -> Result<String> {
    if let Some(lib) = lib {
        return Ok(lib.to_string());
    }
    let manifest = read_manifest(&config.manifest_path())?;
    Ok(config.library_name(&manifest)?)
}

/// Print the manifest version
fn cmd_version(config: &PipelineConfig, manifest: Option<&Path>) -> Result<ExitCode> {
    let path = manifest_path(config, manifest);
    let resolved = resolve_version_file(&path)
        .with_context(|| format!("Failed to resolve version from {}", path.display()))?;

    println!("{}", resolved.version);
    println!("prerelease: {}", resolved.prerelease);
    Ok(ExitCode::SUCCESS)
}

/// Print the effective matrix
fn cmd_matrix(config: &PipelineConfig, lib: Option<&str>) -> Result<ExitCode> {
    let lib = library_name(config, lib)?;
    let matrix = config.matrix();
    matrix.validate(&lib).context("Invalid target matrix")?;

    println!(
        "{:<16} {:<28} {:<10} {:<32} CANONICAL",
        "PLATFORM", "TARGET", "TOOLCHAIN", "RAW"
    );
    for entry in matrix.entries() {
        println!(
            "{:<16} {:<28} {:<10} {:<32} {}",
            entry.platform,
            entry.target,
            entry.toolchain,
            entry.raw_file_name(&lib),
            entry.canonical_file_name(&lib)
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Normalize one artifact in place
async fn cmd_normalize(
    config: &PipelineConfig,
    raw: &Path,
    name: &str,
    out_dir: Option<&Path>,
) -> Result<ExitCode> {
    let out_dir = out_dir.unwrap_or(config.out_dir.as_path());
    let artifact = normalize(raw, out_dir, name)
        .await
        .with_context(|| format!("Failed to normalize {}", raw.display()))?;

    println!("{}  {}", artifact.digest, artifact.path.display());
    println!("digest: {}", artifact.digest_path.display());
    Ok(ExitCode::SUCCESS)
}

fn release_store(config: &PipelineConfig, dry_run: bool) -> Result<Arc<dyn ReleaseStore>> {
    if dry_run {
        info!("Dry run: publishing to an in-memory release store");
        return Ok(Arc::new(MemoryReleaseStore::new()));
    }

    let github = config
        .github
        .to_config()
        .context("GitHub repository is not configured")?;
    if github.token.is_none() {
        anyhow::bail!(
            "{} is not set; export a token or use --dry-run",
            config.github.token_env
        );
    }
    let store = GitHubReleaseStore::new(github).context("Failed to create GitHub client")?;
    Ok(Arc::new(store))
}

/// Run the full release pipeline
async fn cmd_run(
    config: &PipelineConfig,
    only: &[String],
    dry_run: bool,
    report_path: Option<&Path>,
) -> Result<ExitCode> {
    let manifest_path = config.manifest_path();
    let manifest = read_manifest(&manifest_path)?;
    let lib = config.library_name(&manifest)?;
    let matrix = config
        .matrix()
        .select(only)
        .context("Invalid --only selection")?;

    let mut toolchain = CargoToolchain::new(&config.workspace);
    if let Some(target_dir) = &config.target_dir {
        toolchain = toolchain.with_target_dir(target_dir);
    }

    let publisher = Arc::new(ReleasePublisher::new(
        release_store(config, dry_run)?,
        config.existing_release,
    ));
    let orchestrator = ReleaseOrchestrator::new(
        Arc::new(toolchain),
        publisher,
        matrix,
        RunOptions::from_config(config, &lib),
    );

    let (canceller, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    println!(
        "Releasing {} from {} ({} entries)",
        lib,
        manifest_path.display(),
        orchestrator.matrix().len()
    );

    let report = orchestrator
        .run(&manifest, signal)
        .await
        .context("Release run failed")?;

    println!("{}", report.render_summary());
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }

    Ok(exit_code(&report))
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}

fn exit_code(report: &RunReport) -> ExitCode {
    if report.success() {
        ExitCode::SUCCESS
    } else if report.cancelled() {
        ExitCode::from(EXIT_RUN_FAILED)
    } else {
        ExitCode::from(EXIT_ENTRY_FAILED)
    }
}
