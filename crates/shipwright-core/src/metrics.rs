//! Process-wide release counters.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`] at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters for one process.
pub struct Metrics {
    builds_succeeded: AtomicU64,
    builds_failed: AtomicU64,
    assets_uploaded: AtomicU64,
    upload_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_succeeded: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
            assets_uploaded: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_builds_succeeded(&self) {
        self.builds_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_succeeded", "counter incremented");
    }

    pub fn inc_builds_failed(&self) {
        self.builds_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_failed", "counter incremented");
    }

    pub fn inc_assets_uploaded(&self) {
        self.assets_uploaded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "assets_uploaded", "counter incremented");
    }

    pub fn inc_upload_failures(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "upload_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            builds_succeeded = self.builds_succeeded(),
            builds_failed = self.builds_failed(),
            assets_uploaded = self.assets_uploaded(),
            upload_failures = self.upload_failures(),
        );
    }

    pub fn builds_succeeded(&self) -> u64 {
        self.builds_succeeded.load(Ordering::Relaxed)
    }

    pub fn builds_failed(&self) -> u64 {
        self.builds_failed.load(Ordering::Relaxed)
    }

    pub fn assets_uploaded(&self) -> u64 {
        self.assets_uploaded.load(Ordering::Relaxed)
    }

    pub fn upload_failures(&self) -> u64 {
        self.upload_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_builds_succeeded();
        m.inc_builds_succeeded();
        m.inc_builds_failed();
        assert_eq!(m.builds_succeeded(), 2);
        assert_eq!(m.builds_failed(), 1);

        m.inc_assets_uploaded();
        m.inc_upload_failures();
        m.inc_upload_failures();
        assert_eq!(m.assets_uploaded(), 1);
        assert_eq!(m.upload_failures(), 2);
    }
}
