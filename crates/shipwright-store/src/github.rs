//! GitHub releases backend
//!
//! Talks to the GitHub REST v3 releases API. Releases are keyed by tag name;
//! assets are replaced by deleting any same-named asset before uploading,
//! which gives the overwrite-by-name semantics `ReleaseStore` requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{AssetRecord, NewRelease, ReleaseId, ReleaseRecord, ReleaseStore, StoreResult};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_UPLOADS_URL: &str = "https://uploads.github.com";
const API_VERSION: &str = "2022-11-28";
/// Largest page size the assets listing accepts.
const ASSETS_PER_PAGE: usize = 100;

/// GitHub connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base URL
    pub api_url: String,
    /// Asset upload base URL
    pub uploads_url: String,
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// API token (required for creating releases)
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl GitHubConfig {
    /// Config for `owner/repo` against github.com
    pub fn new(owner: &str, repo: &str) -> Self {
        GitHubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
        }
    }

    /// Build from `GITHUB_REPOSITORY`, `GITHUB_TOKEN` and `GITHUB_API_URL`.
    ///
    /// Returns `None` when `GITHUB_REPOSITORY` is unset or not `owner/repo`.
    pub fn from_env() -> Option<Self> {
        let slug = std::env::var("GITHUB_REPOSITORY").ok()?;
        let (owner, repo) = split_repository(&slug)?;
        let mut config = Self::new(owner, repo);
        if let Ok(api_url) = std::env::var("GITHUB_API_URL") {
            config.api_url = api_url;
        }
        config.token = std::env::var("GITHUB_TOKEN").ok();
        Some(config)
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    /// `/releases/tags/<tag>` with the tag percent-encoded as one segment.
    fn tag_url(&self, tag: &str) -> StoreResult<Url> {
        let mut url = Url::parse(&self.repo_url())
            .map_err(|e| StoreError::Http(format!("invalid api url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::Http("api url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["releases", "tags", tag]);
        Ok(url)
    }

    fn upload_url(&self, id: ReleaseId) -> String {
        format!(
            "{}/repos/{}/{}/releases/{}/assets",
            self.uploads_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            id
        )
    }
}

/// Split an `owner/repo` slug.
pub fn split_repository(slug: &str) -> Option<(&str, &str)> {
    let (owner, repo) = slug.trim().split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

#[derive(Debug, Serialize)]
struct CreateReleaseBody<'a> {
    tag_name: &'a str,
    name: &'a str,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
}

/// True when a 422 body says the tag is already taken.
fn is_already_exists(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.errors.iter().any(|e| e.code.as_deref() == Some("already_exists")))
        .unwrap_or(false)
}

async fn api_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or(body);
    StoreError::Api { status, message }
}

/// Page after `page`, or `None` once a short page shows the listing is done.
fn next_page(page: u32, received: usize) -> Option<u32> {
    (received >= ASSETS_PER_PAGE).then_some(page + 1)
}

/// GitHub releases client
pub struct GitHubReleaseStore {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubReleaseStore {
    /// Create a new client
    pub fn new(config: GitHubConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StoreError::Http(format!("invalid token header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(GitHubReleaseStore {
            config,
            http_client,
        })
    }

    async fn fetch_release(&self, id: ReleaseId) -> StoreResult<ReleaseResponse> {
        let url = format!("{}/releases/{}", self.config.repo_url(), id);
        let response = self.http_client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::ReleaseNotFound { id: id.0 }),
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(api_error(response).await),
        }
    }

    async fn fetch_assets(&self, id: ReleaseId) -> StoreResult<Vec<AssetResponse>> {
        let url = format!("{}/releases/{}/assets", self.config.repo_url(), id);
        let per_page = ASSETS_PER_PAGE.to_string();
        let mut assets = Vec::new();
        let mut page = 1u32;
        loop {
            let page_param = page.to_string();
            let response = self
                .http_client
                .get(&url)
                .query(&[("per_page", per_page.as_str()), ("page", page_param.as_str())])
                .send()
                .await?;
            let batch: Vec<AssetResponse> = match response.status() {
                StatusCode::NOT_FOUND => return Err(StoreError::ReleaseNotFound { id: id.0 }),
                s if s.is_success() => response.json().await?,
                _ => return Err(api_error(response).await),
            };
            let received = batch.len();
            assets.extend(batch);
            match next_page(page, received) {
                Some(next) => page = next,
                None => return Ok(assets),
            }
        }
    }

    async fn delete_asset(&self, asset_id: u64) -> StoreResult<()> {
        let url = format!("{}/releases/assets/{}", self.config.repo_url(), asset_id);
        let response = self.http_client.delete(&url).send().await?;
        // Already gone is fine: another writer replaced it first.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }
}

#[async_trait]
impl ReleaseStore for GitHubReleaseStore {
    async fn create_release(&self, release: &NewRelease) -> StoreResult<ReleaseId> {
        info!(tag = %release.tag, prerelease = release.prerelease, "Creating GitHub release");
        let url = format!("{}/releases", self.config.repo_url());
        let body = CreateReleaseBody {
            tag_name: &release.tag,
            name: &release.display_name,
            prerelease: release.prerelease,
        };
        let response = self.http_client.post(&url).json(&body).send().await?;

        let status = response.status();
        if status.is_success() {
            let created: ReleaseResponse = response.json().await?;
            return Ok(ReleaseId(created.id));
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            if is_already_exists(&text) {
                return Err(StoreError::AlreadyExists {
                    tag: release.tag.clone(),
                });
            }
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Err(api_error(response).await)
    }

    async fn find_release(&self, tag: &str) -> StoreResult<Option<ReleaseId>> {
        let url = self.config.tag_url(tag)?;
        let response = self.http_client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let found: ReleaseResponse = response.json().await?;
                Ok(Some(ReleaseId(found.id)))
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn get_release(&self, id: ReleaseId) -> StoreResult<ReleaseRecord> {
        let release = self.fetch_release(id).await?;
        Ok(ReleaseRecord {
            id: ReleaseId(release.id),
            display_name: release.name.unwrap_or_else(|| release.tag_name.clone()),
            tag: release.tag_name,
            prerelease: release.prerelease,
            assets: release.assets.into_iter().map(|a| a.name).collect(),
            created_at: release.created_at.unwrap_or_else(Utc::now),
        })
    }

    async fn attach_asset(
        &self,
        id: ReleaseId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> StoreResult<()> {
        for existing in self.fetch_assets(id).await? {
            if existing.name == file_name {
                debug!(asset = %file_name, asset_id = existing.id, "Replacing existing asset");
                self.delete_asset(existing.id).await?;
            }
        }

        let response = self
            .http_client
            .post(self.config.upload_url(id))
            .query(&[("name", file_name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(asset = %file_name, release_id = %id, "Uploaded asset");
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn list_assets(&self, id: ReleaseId) -> StoreResult<Vec<AssetRecord>> {
        Ok(self
            .fetch_assets(id)
            .await?
            .into_iter()
            .map(|a| AssetRecord {
                name: a.name,
                size: a.size,
            })
            .collect())
    }
}
