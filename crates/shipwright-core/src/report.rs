//! Run report: what happened to every matrix entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::publish::ReleaseHandle;
use crate::version::ResolvedVersion;

/// Stage of a per-entry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Normalize,
    Publish,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Normalize => "normalize",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final state of one matrix entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Artifact and sidecar attached to the release.
    Published { assets: Vec<String>, digest: String },
    /// The chain stopped at `stage`.
    Failed { stage: Stage, error: String },
    /// The run was cancelled before this entry finished.
    Cancelled { stage: Stage },
}

/// Outcome of one matrix entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub platform: String,
    pub canonical_name: String,
    #[serde(flatten)]
    pub status: EntryStatus,
    pub duration_ms: u64,
}

impl EntryOutcome {
    pub fn published(&self) -> bool {
        matches!(self.status, EntryStatus::Published { .. })
    }

    /// Stage the entry stopped at, if it did not publish.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.status {
            EntryStatus::Published { .. } => None,
            EntryStatus::Failed { stage, .. } | EntryStatus::Cancelled { stage } => Some(stage),
        }
    }
}

/// Result of a complete release run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub version: ResolvedVersion,
    pub release: ReleaseHandle,
    /// One outcome per matrix entry, in matrix order.
    pub entries: Vec<EntryOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.entries.iter().all(EntryOutcome::published)
    }

    pub fn succeeded_count(&self) -> usize {
        self.entries.iter().filter(|e| e.published()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.published()).count()
    }

    /// True if any entry was stopped by cancellation.
    pub fn cancelled(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, EntryStatus::Cancelled { .. }))
    }

    pub fn entry(&self, platform: &str) -> Option<&EntryOutcome> {
        self.entries.iter().find(|e| e.platform == platform)
    }

    /// Every asset name this run attached.
    pub fn assets(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match &e.status {
                EntryStatus::Published { assets, .. } => Some(assets.iter().map(String::as_str)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Human-readable summary, one line per entry.
    pub fn render_summary(&self) -> String {
        let mut out = format!(
            "release {} (prerelease: {}, {})\n",
            self.version.version,
            self.version.prerelease,
            if self.release.created { "created" } else { "reused" }
        );
        for entry in &self.entries {
            let line = match &entry.status {
                EntryStatus::Published { assets, .. } => {
                    format!("  ok      {:<16} {}", entry.platform, assets.join(", "))
                }
                EntryStatus::Failed { stage, error } => {
                    format!("  FAILED  {:<16} [{stage}] {error}", entry.platform)
                }
                EntryStatus::Cancelled { stage } => {
                    format!("  CANCEL  {:<16} [{stage}]", entry.platform)
                }
            };
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!(
            "{} succeeded, {} failed",
            self.succeeded_count(),
            self.failed_count()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::resolve_version;
    use shipwright_store::ReleaseId;

    fn outcome(platform: &str, status: EntryStatus) -> EntryOutcome {
        EntryOutcome {
            platform: platform.to_string(),
            canonical_name: format!("lib-{platform}"),
            status,
            duration_ms: 10,
        }
    }

    fn report(entries: Vec<EntryOutcome>) -> RunReport {
        RunReport {
            run_id: "run123".to_string(),
            version: resolve_version("[package]\nversion = \"2.0.0\"\n").expect("version"),
            release: ReleaseHandle {
                id: ReleaseId(1),
                tag: "2.0.0".to_string(),
                prerelease: false,
                created: true,
            },
            entries,
            started_at: Utc::now(),
            duration_ms: 300,
        }
    }

    #[test]
    fn test_report_counts() {
        let report = report(vec![
            outcome(
                "linux-amd64",
                EntryStatus::Published {
                    assets: vec!["a.so".to_string(), "a.so.sha256".to_string()],
                    digest: "00".to_string(),
                },
            ),
            outcome(
                "windows-amd64",
                EntryStatus::Failed {
                    stage: Stage::Build,
                    error: "exit code 101".to_string(),
                },
            ),
        ]);

        assert!(!report.success());
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.assets(), vec!["a.so", "a.so.sha256"]);
        assert_eq!(
            report.entry("windows-amd64").and_then(EntryOutcome::failed_stage),
            Some(Stage::Build)
        );

        let summary = report.render_summary();
        assert!(summary.contains("FAILED  windows-amd64"));
        assert!(summary.contains("[build] exit code 101"));
        assert!(summary.ends_with("1 succeeded, 1 failed"));
    }

    #[test]
    fn test_report_json_shape() {
        let report = report(vec![outcome(
            "darwin-arm64",
            EntryStatus::Cancelled {
                stage: Stage::Publish,
            },
        )]);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["entries"][0]["status"], "cancelled");
        assert_eq!(json["entries"][0]["stage"], "publish");
        assert!(report.cancelled());
        assert_eq!(json["version"]["version"], "2.0.0");
    }
}
