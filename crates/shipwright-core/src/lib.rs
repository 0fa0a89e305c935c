//! Shipwright Core Library
//!
//! Release orchestration for a native library built across a target matrix:
//! read the version from the manifest, build every platform entry, rename the
//! artifacts to canonical names with SHA-256 sidecars, and attach everything
//! to a single tagged release.
//!
//! ## Key Components
//!
//! - `version`: manifest version lookup and pre-release detection
//! - `matrix`: platform table and canonical naming
//! - `build`: `Toolchain` trait and the cargo-backed implementation
//! - `normalize`: canonical rename plus digest sidecar
//! - `publish`: create-once release handling and asset upload
//! - `orchestrator`: per-entry fan-out behind the release barrier

pub mod build;
pub mod cancel;
pub mod config;
pub mod error;
pub mod matrix;
pub mod metrics;
pub mod normalize;
pub mod obs;
pub mod orchestrator;
pub mod publish;
pub mod report;
pub mod telemetry;
pub mod version;

pub use build::{CargoToolchain, Toolchain};
pub use cancel::{cancel_pair, CancelSignal, Canceller};
pub use config::{PipelineConfig, Timeouts, CONFIG_FILE_NAME};
pub use error::{Result, ShipError};
pub use matrix::{MatrixEntry, TargetMatrix};
pub use normalize::{normalize, NormalizedArtifact};
pub use orchestrator::{ReleaseOrchestrator, RunOptions, StageTimeouts};
pub use publish::{ExistingReleasePolicy, ReleaseHandle, ReleasePublisher};
pub use report::{EntryOutcome, EntryStatus, RunReport, Stage};
pub use version::{resolve_version, resolve_version_file, ResolvedVersion, Version};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
