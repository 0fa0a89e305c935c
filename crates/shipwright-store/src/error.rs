//! Error types for shipwright-store

use thiserror::Error;

/// Errors returned by a release store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// A release for this tag already exists
    #[error("Release already exists for tag: {tag}")]
    AlreadyExists { tag: String },

    /// No release with this id
    #[error("Release not found: {id}")]
    ReleaseNotFound { id: u64 },

    /// Transport-level failure talking to the store
    #[error("HTTP error: {0}")]
    Http(String),

    /// The store answered with an unexpected status
    #[error("Release store API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failure injected by a fake store
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
