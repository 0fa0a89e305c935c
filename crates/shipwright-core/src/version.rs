//! Version resolution from a package manifest.
//!
//! The manifest is scanned as text rather than deserialized: the first
//! `[package]` or `[workspace.package]` table wins, and the first
//! `version = "..."` assignment inside it is returned verbatim. Later package
//! tables are never consulted, even when the first one carries no version.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipError};

static VERSION_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^version\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

static PRERELEASE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[0-9A-Za-z]").expect("static regex"));

/// A version string exactly as written in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Version {
    type Error = ShipError;

    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() {
            return Err(ShipError::ManifestParse("version string is empty".to_string()));
        }
        Ok(Version(value))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The version of a run plus its derived pre-release flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVersion {
    pub version: Version,
    pub prerelease: bool,
}

/// True iff `version` contains a hyphen followed by an alphanumeric.
pub fn is_prerelease(version: &str) -> bool {
    PRERELEASE_SUFFIX.is_match(version)
}

/// Name of the table a header line opens, or `None` for array tables.
fn table_name(header: &str) -> Option<String> {
    if header.starts_with("[[") {
        return None;
    }
    let inner = header.strip_prefix('[')?.split(']').next()?;
    Some(inner.chars().filter(|c| !c.is_whitespace() && *c != '"').collect())
}

fn is_package_table(name: &str) -> bool {
    name == "package" || name == "workspace.package"
}

/// Extract the version from manifest text.
pub fn resolve_version(manifest: &str) -> Result<ResolvedVersion> {
    let mut in_package = false;
    let mut section = String::new();

    for line in manifest.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            if in_package {
                return Err(ShipError::ManifestParse(format!(
                    "no version assignment in [{section}]"
                )));
            }
            if let Some(name) = table_name(line).filter(|n| is_package_table(n)) {
                in_package = true;
                section = name;
            }
            continue;
        }

        if !in_package {
            continue;
        }

        if let Some(caps) = VERSION_ASSIGNMENT.captures(line) {
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let version = Version::try_from(raw)?;
            let prerelease = is_prerelease(version.as_str());
            return Ok(ResolvedVersion {
                version,
                prerelease,
            });
        }
    }

    if in_package {
        Err(ShipError::ManifestParse(format!(
            "no version assignment in [{section}]"
        )))
    } else {
        Err(ShipError::ManifestParse(
            "no [package] or [workspace.package] section".to_string(),
        ))
    }
}

/// Read a manifest from disk and resolve its version.
pub fn resolve_version_file(path: &Path) -> Result<ResolvedVersion> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ShipError::ManifestParse(format!("cannot read {}: {e}", path.display()))
    })?;
    resolve_version(&text)
}
