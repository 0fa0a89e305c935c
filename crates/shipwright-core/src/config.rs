//! Pipeline configuration (`shipwright.toml`).
//!
//! Every field has a default, so a missing file means "built-in matrix,
//! `Cargo.toml` in the current directory, artifacts into `dist/`".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipwright_store::github::split_repository;
use shipwright_store::GitHubConfig;

use crate::error::{Result, ShipError};
use crate::matrix::{MatrixEntry, TargetMatrix, DEFAULT_TOOLCHAIN, LIB_PLACEHOLDER};
use crate::publish::ExistingReleasePolicy;
use crate::version::ResolvedVersion;

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "shipwright.toml";

/// Per-stage time limits in seconds; 0 disables the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub build_secs: u64,
    pub create_secs: u64,
    pub upload_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build_secs: 3600,
            create_secs: 60,
            upload_secs: 600,
        }
    }
}

impl Timeouts {
    fn limit(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn build(&self) -> Option<Duration> {
        Self::limit(self.build_secs)
    }

    pub fn create(&self) -> Option<Duration> {
        Self::limit(self.create_secs)
    }

    pub fn upload(&self) -> Option<Duration> {
        Self::limit(self.upload_secs)
    }
}

/// `[github]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub api_url: Option<String>,
    pub uploads_url: Option<String>,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            api_url: None,
            uploads_url: None,
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl GitHubSection {
    /// Resolve into a client config, filling gaps from `GITHUB_REPOSITORY`.
    pub fn to_config(&self) -> Result<GitHubConfig> {
        let env_slug = std::env::var("GITHUB_REPOSITORY").ok();
        let env_parts = env_slug.as_deref().and_then(split_repository);

        let owner = self
            .owner
            .clone()
            .or_else(|| env_parts.map(|(o, _)| o.to_string()));
        let repo = self
            .repo
            .clone()
            .or_else(|| env_parts.map(|(_, r)| r.to_string()));
        let (Some(owner), Some(repo)) = (owner, repo) else {
            return Err(ShipError::Config(
                "GitHub owner/repo not configured and GITHUB_REPOSITORY is unset".to_string(),
            ));
        };

        let mut config = GitHubConfig::new(&owner, &repo);
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(uploads_url) = &self.uploads_url {
            config.uploads_url = uploads_url.clone();
        }
        config.token = std::env::var(&self.token_env).ok();
        Ok(config)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Library base name; derived from the manifest when unset.
    pub library: Option<String>,
    pub manifest: PathBuf,
    pub workspace: PathBuf,
    pub target_dir: Option<PathBuf>,
    pub out_dir: PathBuf,
    /// Release title template over `{version}` and `{lib}`.
    pub release_name: String,
    pub existing_release: ExistingReleasePolicy,
    /// Toolchain for the built-in matrix.
    pub toolchain: String,
    pub timeouts: Timeouts,
    pub github: GitHubSection,
    /// Replaces the built-in matrix when non-empty.
    #[serde(rename = "target")]
    pub targets: Vec<MatrixEntry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            library: None,
            manifest: PathBuf::from("Cargo.toml"),
            workspace: PathBuf::from("."),
            target_dir: None,
            out_dir: PathBuf::from("dist"),
            release_name: "{version}".to_string(),
            existing_release: ExistingReleasePolicy::default(),
            toolchain: DEFAULT_TOOLCHAIN.to_string(),
            timeouts: Timeouts::default(),
            github: GitHubSection::default(),
            targets: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ShipError::Config(e.to_string()))
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ShipError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, else `shipwright.toml` if present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE_NAME).exists() => Self::load(Path::new(CONFIG_FILE_NAME)),
            None => Ok(Self::default()),
        }
    }

    /// The effective matrix.
    pub fn matrix(&self) -> TargetMatrix {
        if self.targets.is_empty() {
            TargetMatrix::builtin(&self.toolchain)
        } else {
            TargetMatrix::from_entries(self.targets.clone())
        }
    }

    /// Manifest path, relative paths taken from the workspace.
    pub fn manifest_path(&self) -> PathBuf {
        self.workspace.join(&self.manifest)
    }

    /// Library name from config, else from the manifest text.
    pub fn library_name(&self, manifest: &str) -> Result<String> {
        if let Some(lib) = &self.library {
            return Ok(lib.clone());
        }
        library_from_manifest(manifest).ok_or_else(|| {
            ShipError::Config("library name not configured and not found in manifest".to_string())
        })
    }

    pub fn render_release_name(&self, version: &ResolvedVersion, lib: &str) -> String {
        render_release_name(&self.release_name, version, lib)
    }
}

/// Fill `{version}` and `{lib}` in a release title template.
pub fn render_release_name(template: &str, version: &ResolvedVersion, lib: &str) -> String {
    template
        .replace("{version}", version.version.as_str())
        .replace(LIB_PLACEHOLDER, lib)
}

/// `[lib] name`, else `[package] name` with `-` mapped to `_`.
///
/// `None` when the manifest is not valid TOML or names neither.
pub fn library_from_manifest(manifest: &str) -> Option<String> {
    let table = toml::from_str::<toml::Table>(manifest).ok()?;
    let name_in = |section: &str| {
        table
            .get(section)
            .and_then(|s| s.get("name"))
            .and_then(toml::Value::as_str)
    };

    name_in("lib")
        .map(str::to_string)
        .or_else(|| name_in("package").map(|n| n.replace('-', "_")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::resolve_version;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.matrix().len(), 4);
        assert_eq!(config.existing_release, ExistingReleasePolicy::Fail);
        assert_eq!(config.manifest_path(), PathBuf::from("./Cargo.toml"));
    }

    #[test]
    fn test_full_config() {
        let config = PipelineConfig::from_toml_str(
            r#"
library = "testangel_oracle"
out_dir = "artifacts"
release_name = "{lib} v{version}"
existing_release = "reuse"

[timeouts]
build_secs = 0
upload_secs = 30

[github]
owner = "stevedores-org"
repo = "testangel-oracle"

[[target]]
platform = "linux-amd64"
target = "x86_64-unknown-linux-gnu"
toolchain = "1.80.0"
raw_name = "lib{lib}.so"
canonical_name = "lib{lib}-linux-amd64.so"
extra_flags = ["--locked"]
"#,
        )
        .expect("parse");

        assert_eq!(config.existing_release, ExistingReleasePolicy::Reuse);
        assert_eq!(config.out_dir, PathBuf::from("artifacts"));
        assert_eq!(config.timeouts.build(), None);
        assert_eq!(config.timeouts.upload(), Some(Duration::from_secs(30)));
        assert_eq!(config.timeouts.create(), Some(Duration::from_secs(60)));

        let matrix = config.matrix();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix.entries()[0].toolchain, "1.80.0");

        let version = resolve_version("[package]\nversion = \"2.0.0\"\n").expect("version");
        assert_eq!(
            config.render_release_name(&version, "testangel_oracle"),
            "testangel_oracle v2.0.0"
        );

        let github = config.github.to_config().expect("github config");
        assert_eq!(github.owner, "stevedores-org");
        assert_eq!(github.repo, "testangel-oracle");
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = PipelineConfig::from_toml_str("existing_release = \"overwrite\"")
            .expect_err("bad policy");
        assert!(matches!(err, ShipError::Config(_)));
    }

    #[test]
    fn test_library_from_manifest() {
        let manifest = r#"
[package]
name = "testangel-oracle"
version = "1.0.0"

[lib]
crate-type = ["cdylib"]
"#;
        assert_eq!(
            library_from_manifest(manifest).as_deref(),
            Some("testangel_oracle")
        );

        let manifest = "[package]\nname = \"engine\"\n[lib]\nname = \"custom_name\"\n";
        assert_eq!(library_from_manifest(manifest).as_deref(), Some("custom_name"));

        assert_eq!(library_from_manifest("[workspace]\n"), None);
        assert_eq!(library_from_manifest("[package\nname = "), None);
    }

    #[test]
    fn test_library_from_manifest_with_commented_headers() {
        let manifest = r#"
[package] # published crate
name = "testangel-oracle"
version = "1.0.0"

[lib] # native engine
name = "custom_engine"
crate-type = ["cdylib"]
"#;
        assert_eq!(
            library_from_manifest(manifest).as_deref(),
            Some("custom_engine")
        );

        let manifest = "[package]   # main\nname = 'single-quoted'\n";
        assert_eq!(
            library_from_manifest(manifest).as_deref(),
            Some("single_quoted")
        );
    }

    #[test]
    fn test_library_name_prefers_config() {
        let config = PipelineConfig {
            library: Some("configured".to_string()),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.library_name("[package]\nname = \"x\"\n").expect("lib"),
            "configured"
        );
        assert!(PipelineConfig::default().library_name("").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PipelineConfig::load(&dir.path().join("nope.toml")).expect_err("missing");
        assert!(err.to_string().contains("cannot read"));
    }
}
