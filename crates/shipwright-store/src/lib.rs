//! Shipwright Store: release-hosting backends
//!
//! This crate owns the boundary between the release orchestrator and the
//! service that hosts tagged releases. The orchestrator only ever talks to the
//! [`ReleaseStore`] trait; the hosting service itself is opaque.
//!
//! ## Key Components
//!
//! - `ReleaseStore`: create/find releases and attach assets by name
//! - `MemoryReleaseStore`: in-memory fake for tests and dry runs
//! - `GitHubReleaseStore`: GitHub REST v3 releases backend

mod error;
pub mod fakes;
pub mod github;
pub mod store;

pub use error::StoreError;
pub use fakes::MemoryReleaseStore;
pub use github::{GitHubConfig, GitHubReleaseStore};
pub use store::{AssetRecord, NewRelease, ReleaseId, ReleaseRecord, ReleaseStore, StoreResult};
