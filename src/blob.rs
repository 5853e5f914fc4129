use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::StorageAdapter;
use crate::error::StoreError;
use crate::ids::now_millis;
use crate::model::SyncData;

pub const GIST_ID_KEY: &str = "readrecall_gist_id";
pub const LAST_SYNC_KEY: &str = "readrecall_last_sync";
pub const SNAPSHOT_FILE: &str = "data.json";
const GIST_DESCRIPTION: &str = "阅读回响数据备份";

/// Where the legacy sync path keeps its single snapshot document.
#[async_trait]
pub trait SnapshotRemote: Send + Sync {
    /// `None` when no snapshot has been uploaded yet.
    async fn download(&self) -> anyhow::Result<Option<SyncData>>;
    async fn upload(&self, data: &SyncData) -> anyhow::Result<()>;
}

/// Snapshot stored as `data.json` in a private GitHub gist.
///
/// The gist ID is remembered in the storage adapter after the first upload;
/// without it there is nothing to download.
#[derive(Clone)]
pub struct GistRemote {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    adapter: Arc<dyn StorageAdapter>,
}

#[derive(Debug, Deserialize)]
struct Gist {
    id: String,
    #[serde(default)]
    files: BTreeMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

impl GistRemote {
    pub fn new(
        api_url: &str,
        token: Option<String>,
        adapter: Arc<dyn StorageAdapter>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("readrecall/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.trim().is_empty()),
            adapter,
        })
    }

    pub async fn gist_id(&self) -> anyhow::Result<Option<String>> {
        self.adapter.get(GIST_ID_KEY).await.context("read gist id")
    }

    pub async fn has_cloud_data(&self) -> anyhow::Result<bool> {
        Ok(self.gist_id().await?.is_some())
    }

    /// Epoch milliseconds of the last successful upload.
    pub async fn last_sync_time(&self) -> anyhow::Result<Option<i64>> {
        let raw = self.adapter.get(LAST_SYNC_KEY).await.context("read last sync")?;
        Ok(raw.and_then(|v| v.trim().parse().ok()))
    }

    fn token(&self) -> Result<&str, StoreError> {
        self.token.as_deref().ok_or(StoreError::NotAuthenticated)
    }

    fn request(&self, method: reqwest::Method, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("token {token}"))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn create_gist(&self, token: &str, content: &str) -> anyhow::Result<String> {
        let url = format!("{}/gists", self.api_url);
        let body = serde_json::json!({
            "description": GIST_DESCRIPTION,
            "public": false,
            "files": { SNAPSHOT_FILE: { "content": content } },
        });
        let resp = self
            .request(reqwest::Method::POST, &url, token)
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::remote(format!("create gist: {err}")))?;
        let gist: Gist = parse_response(resp, "create gist").await?;
        Ok(gist.id)
    }

    async fn update_gist(&self, token: &str, gist_id: &str, content: &str) -> anyhow::Result<()> {
        let url = format!("{}/gists/{gist_id}", self.api_url);
        let body = serde_json::json!({
            "files": { SNAPSHOT_FILE: { "content": content } },
        });
        let resp = self
            .request(reqwest::Method::PATCH, &url, token)
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::remote(format!("update gist: {err}")))?;
        let _: serde_json::Value = parse_response(resp, "update gist").await?;
        Ok(())
    }

    async fn get_gist(&self, token: &str, gist_id: &str) -> anyhow::Result<Gist> {
        let url = format!("{}/gists/{gist_id}", self.api_url);
        let resp = self
            .request(reqwest::Method::GET, &url, token)
            .send()
            .await
            .map_err(|err| StoreError::remote(format!("get gist: {err}")))?;
        parse_response(resp, "get gist").await
    }

    async fn file_content(&self, token: &str, file: GistFile) -> anyhow::Result<Option<String>> {
        match (file.truncated, file.raw_url) {
            (true, Some(raw_url)) => {
                let resp = self
                    .request(reqwest::Method::GET, &raw_url, token)
                    .send()
                    .await
                    .map_err(|err| StoreError::remote(format!("get gist file: {err}")))?;
                let status = resp.status();
                let text = resp
                    .text()
                    .await
                    .map_err(|err| StoreError::remote(format!("get gist file: {err}")))?;
                if !status.is_success() {
                    return Err(
                        StoreError::remote(format!("get gist file failed ({status})")).into(),
                    );
                }
                Ok(Some(text))
            }
            (_, _) => Ok(file.content),
        }
    }
}

#[async_trait]
impl SnapshotRemote for GistRemote {
    async fn download(&self) -> anyhow::Result<Option<SyncData>> {
        let token = self.token()?;
        let Some(gist_id) = self.gist_id().await? else {
            return Ok(None);
        };

        let mut gist = self.get_gist(token, &gist_id).await?;
        let file = match gist.files.remove(SNAPSHOT_FILE) {
            Some(file) => file,
            None => match gist.files.into_values().next() {
                Some(file) => file,
                None => return Ok(None),
            },
        };
        let Some(content) = self.file_content(token, file).await? else {
            return Ok(None);
        };

        let data = serde_json::from_str(&content).context("parse snapshot from gist")?;
        tracing::debug!(gist_id = %gist_id, "downloaded snapshot");
        Ok(Some(data))
    }

    async fn upload(&self, data: &SyncData) -> anyhow::Result<()> {
        let token = self.token()?;
        let content = serde_json::to_string_pretty(data).context("serialize snapshot")?;

        match self.gist_id().await? {
            Some(gist_id) => {
                self.update_gist(token, &gist_id, &content).await?;
                tracing::debug!(gist_id = %gist_id, "updated snapshot gist");
            }
            None => {
                let gist_id = self.create_gist(token, &content).await?;
                self.adapter
                    .set(GIST_ID_KEY, &gist_id)
                    .await
                    .context("save gist id")?;
                tracing::info!(gist_id = %gist_id, "created snapshot gist");
            }
        }

        self.adapter
            .set(LAST_SYNC_KEY, &now_millis().to_string())
            .await
            .context("save last sync time")?;
        Ok(())
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    op: &str,
) -> anyhow::Result<T> {
    let status = resp.status();
    let raw = resp
        .text()
        .await
        .map_err(|err| StoreError::remote(format!("{op}: read body: {err}")))?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(str::to_owned))
            .unwrap_or(raw);
        return Err(StoreError::remote(format!("{op} failed ({status}): {message}")).into());
    }
    serde_json::from_str(&raw).with_context(|| format!("{op}: parse response"))
}
