//! Target matrix: which platforms are built and what their artifacts are called.
//!
//! Every entry pairs the file name the toolchain emits on that platform with
//! the canonical name the release publishes. Both are templates over the
//! library base name (`{lib}`), so the mapping lives in exactly one place.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipError};

/// Placeholder for the library base name in name templates.
pub const LIB_PLACEHOLDER: &str = "{lib}";

/// Default toolchain channel for built-in entries.
pub const DEFAULT_TOOLCHAIN: &str = "stable";

/// One row of the built-in platform table.
struct DefaultTarget {
    platform: &'static str,
    target: &'static str,
    raw_name: &'static str,
    canonical_name: &'static str,
}

const DEFAULT_TARGETS: &[DefaultTarget] = &[
    DefaultTarget {
        platform: "linux-amd64",
        target: "x86_64-unknown-linux-gnu",
        raw_name: "lib{lib}.so",
        canonical_name: "lib{lib}-linux-amd64.so",
    },
    DefaultTarget {
        platform: "windows-amd64",
        target: "x86_64-pc-windows-msvc",
        raw_name: "{lib}.dll",
        canonical_name: "{lib}-amd64.dll",
    },
    DefaultTarget {
        platform: "darwin-amd64",
        target: "x86_64-apple-darwin",
        raw_name: "lib{lib}.dylib",
        canonical_name: "lib{lib}-darwin-amd64.dylib",
    },
    DefaultTarget {
        platform: "darwin-arm64",
        target: "aarch64-apple-darwin",
        raw_name: "lib{lib}.dylib",
        canonical_name: "lib{lib}-darwin-arm64.dylib",
    },
];

fn default_toolchain() -> String {
    DEFAULT_TOOLCHAIN.to_string()
}

/// A single platform/toolchain combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Short platform name, e.g. `linux-amd64`.
    pub platform: String,

    /// Target triple handed to the toolchain.
    pub target: String,

    /// Toolchain channel or version.
    #[serde(default = "default_toolchain")]
    pub toolchain: String,

    /// File name the toolchain emits (template over `{lib}`).
    pub raw_name: String,

    /// Published file name (template over `{lib}`).
    pub canonical_name: String,

    /// Extra flags appended to the build command.
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

impl MatrixEntry {
    /// Raw artifact file name for `lib`.
    pub fn raw_file_name(&self, lib: &str) -> String {
        self.raw_name.replace(LIB_PLACEHOLDER, lib)
    }

    /// Canonical artifact file name for `lib`.
    pub fn canonical_file_name(&self, lib: &str) -> String {
        self.canonical_name.replace(LIB_PLACEHOLDER, lib)
    }

    /// Use a different toolchain for this entry.
    pub fn with_toolchain(mut self, toolchain: &str) -> Self {
        self.toolchain = toolchain.to_string();
        self
    }
}

/// The full set of entries built in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMatrix {
    entries: Vec<MatrixEntry>,
}

impl Default for TargetMatrix {
    fn default() -> Self {
        Self::builtin(DEFAULT_TOOLCHAIN)
    }
}

impl TargetMatrix {
    /// The built-in four-platform matrix on the given toolchain.
    pub fn builtin(toolchain: &str) -> Self {
        let entries = DEFAULT_TARGETS
            .iter()
            .map(|t| MatrixEntry {
                platform: t.platform.to_string(),
                target: t.target.to_string(),
                toolchain: toolchain.to_string(),
                raw_name: t.raw_name.to_string(),
                canonical_name: t.canonical_name.to_string(),
                extra_flags: Vec::new(),
            })
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: Vec<MatrixEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by platform name.
    pub fn get(&self, platform: &str) -> Option<&MatrixEntry> {
        self.entries.iter().find(|e| e.platform == platform)
    }

    /// Check the matrix is usable for `lib`.
    ///
    /// Platforms must be unique, names non-empty and plain file names, and
    /// rendered canonical names unique across the whole matrix.
    pub fn validate(&self, lib: &str) -> Result<()> {
        if lib.is_empty() {
            return Err(ShipError::InvalidMatrix("library name is empty".to_string()));
        }
        if self.entries.is_empty() {
            return Err(ShipError::InvalidMatrix("matrix has no entries".to_string()));
        }

        let mut platforms = HashSet::new();
        let mut canonical = HashSet::new();
        for entry in &self.entries {
            if entry.platform.is_empty() || entry.target.is_empty() {
                return Err(ShipError::InvalidMatrix(
                    "entry with empty platform or target".to_string(),
                ));
            }
            if !platforms.insert(entry.platform.as_str()) {
                return Err(ShipError::InvalidMatrix(format!(
                    "duplicate platform: {}",
                    entry.platform
                )));
            }
            for name in [entry.raw_file_name(lib), entry.canonical_file_name(lib)] {
                if name.is_empty() || name.contains('/') || name.contains('\\') {
                    return Err(ShipError::InvalidMatrix(format!(
                        "{}: '{}' is not a plain file name",
                        entry.platform, name
                    )));
                }
            }
            let name = entry.canonical_file_name(lib);
            if !canonical.insert(name.clone()) {
                return Err(ShipError::InvalidMatrix(format!(
                    "canonical name {name} used by more than one entry"
                )));
            }
        }
        Ok(())
    }

    /// Narrow the matrix to `platforms`, keeping declaration order.
    ///
    /// An empty selection keeps every entry.
    pub fn select(&self, platforms: &[String]) -> Result<Self> {
        if platforms.is_empty() {
            return Ok(self.clone());
        }
        if let Some(unknown) = platforms.iter().find(|p| self.get(p).is_none()) {
            return Err(ShipError::InvalidMatrix(format!("unknown platform: {unknown}")));
        }
        Ok(Self {
            entries: self
                .entries
                .iter()
                .filter(|e| platforms.contains(&e.platform))
                .cloned()
                .collect(),
        })
    }
}
