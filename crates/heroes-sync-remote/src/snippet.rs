//! GitHub Gist snippet store.
//!
//! One private gist holds a JSON file per tournament. The gist is created on first use
//! and its id remembered through the credential provider. Saves never overwrite a file
//! whose timestamp is equal to or newer than the incoming payload.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use heroes_sync_core::{
    is_newer, require_credential, validate_tournament, wire, BackendKind, ConnectionReport,
    CredentialProvider, Namespace, Payload, SaveOutcome, SyncBackend, SyncError, WriterClock,
    PAYLOAD_VERSION,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::http::{ensure_success, read_json, send_with_retry, USER_AGENT};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

const BACKEND: &str = "snippet store";

/// Configuration for [`SnippetStore`].
#[derive(Debug, Clone)]
pub struct GistConfig {
    pub base_url: String,
    pub namespace: Namespace,
}

impl Default for GistConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GITHUB_API_URL.to_string(),
            namespace: Namespace::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Gist {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    files: HashMap<String, GistFile>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
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

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

/// Summary of the backing gist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistInfo {
    pub id: String,
    pub description: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// File names, sorted.
    pub files: Vec<String>,
}

/// Snippet store backend.
pub struct SnippetStore {
    http: Client,
    config: GistConfig,
    credentials: Arc<dyn CredentialProvider>,
    clock: WriterClock,
}

impl SnippetStore {
    pub fn new(config: GistConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: Client::new(),
            config,
            credentials,
            clock: WriterClock::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Fetch the gist, or `None` when it does not exist.
    async fn fetch_gist(&self, token: &str, gist_id: &str) -> Result<Option<Gist>, SyncError> {
        let url = self.api_url(&format!("/gists/{}", gist_id));
        let response =
            send_with_retry("Gist read", || self.authorized(self.http.get(&url), token)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success("Gist read", response).await?;
        read_json("Gist read", response).await.map(Some)
    }

    /// Create the gist with an empty payload for `tournament` and remember its id.
    async fn create_gist(&self, token: &str, tournament: &str) -> Result<Payload, SyncError> {
        let mut empty = Payload::empty(tournament);
        empty.version = Some(PAYLOAD_VERSION.to_string());
        empty.last_updated = Some(now_rfc3339());

        let files = single_file(
            self.config.namespace.snippet_file_name(tournament),
            serde_json::to_string_pretty(&empty)?,
        );
        let body = json!({
            "description": format!("{} Data Storage", self.config.namespace.label),
            "public": false,
            "files": files
        });

        let url = self.api_url("/gists");
        let response = send_with_retry("Gist create", || {
            self.authorized(self.http.post(&url), token).json(&body)
        })
        .await?;
        let response = ensure_success("Gist create", response).await?;
        let created: Gist = read_json("Gist create", response).await?;

        if let Err(e) = self.credentials.remember_resource_id(&created.id) {
            warn!("Created gist {} but could not remember its id: {}", created.id, e);
        }
        info!("Created gist {} for tournament {}", created.id, tournament);
        Ok(empty)
    }

    async fn file_content(&self, token: &str, file: &GistFile) -> Result<String, SyncError> {
        match (&file.content, file.truncated, &file.raw_url) {
            (Some(content), false, _) => Ok(content.clone()),
            (_, _, Some(raw_url)) => {
                let response = send_with_retry("Gist raw read", || {
                    self.authorized(self.http.get(raw_url), token)
                })
                .await?;
                let response = ensure_success("Gist raw read", response).await?;
                response.text().await.map_err(|e| {
                    SyncError::Transport(format!(
                        "Failed to read gist raw content: {}",
                        e.without_url()
                    ))
                })
            }
            (Some(content), true, None) => Ok(content.clone()),
            (None, _, None) => Err(SyncError::ShapeMismatch(
                "gist file has neither content nor raw_url".to_string(),
            )),
        }
    }

    /// Describe the backing gist.
    pub async fn container_info(&self) -> Result<GistInfo, SyncError> {
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let token = credential.require_token(BACKEND)?;
        let gist_id = credential.require_resource_id(BACKEND)?;

        let gist = self
            .fetch_gist(token, gist_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("gist {} does not exist", gist_id)))?;

        let mut files: Vec<String> = gist.files.into_keys().collect();
        files.sort();
        Ok(GistInfo {
            id: gist.id,
            description: gist.description,
            created_at: gist.created_at,
            updated_at: gist.updated_at,
            files,
        })
    }
}

fn single_file(name: String, content: String) -> Map<String, Value> {
    let mut files = Map::new();
    files.insert(name, json!({ "content": content }));
    files
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl SyncBackend for SnippetStore {
    fn kind(&self) -> BackendKind {
        BackendKind::SnippetStore
    }

    #[instrument(skip(self, payload), level = "debug")]
    async fn try_save(
        &self,
        tournament: &str,
        payload: &Payload,
    ) -> Result<SaveOutcome, SyncError> {
        validate_tournament(tournament)?;
        require_credential(self.credentials.as_ref(), BACKEND)?.require_token(BACKEND)?;

        let stored = payload.stamped(tournament, &self.clock);

        match self.try_load(tournament).await {
            Ok(existing) if !is_newer(stored.timestamp, existing.timestamp) => {
                debug!(
                    "Gist already holds timestamp {} >= {}, skipping write",
                    existing.timestamp, stored.timestamp
                );
                return Ok(SaveOutcome::Skipped {
                    existing_timestamp: existing.timestamp,
                });
            }
            Ok(_) => {}
            Err(e @ SyncError::NotConfigured(_)) => return Err(e),
            Err(e) => debug!("No comparable gist content ({}), writing", e),
        }

        // The load above may have created the gist, so resolve the id afterwards.
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let token = credential.require_token(BACKEND)?;
        let gist_id = credential.require_resource_id(BACKEND)?;

        let files = single_file(
            self.config.namespace.snippet_file_name(tournament),
            serde_json::to_string_pretty(&stored)?,
        );
        let body = json!({
            "description": format!(
                "{} {} data - {}",
                self.config.namespace.label,
                tournament,
                now_rfc3339()
            ),
            "files": files
        });

        let url = self.api_url(&format!("/gists/{}", gist_id));
        let response = send_with_retry("Gist update", || {
            self.authorized(self.http.patch(&url), token).json(&body)
        })
        .await?;
        ensure_success("Gist update", response).await?;

        debug!(
            "Wrote {} heroes to gist {} (timestamp {})",
            stored.total_records, gist_id, stored.timestamp
        );
        Ok(SaveOutcome::Written(stored))
    }

    #[instrument(skip(self), level = "debug")]
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
        validate_tournament(tournament)?;
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let token = credential.require_token(BACKEND)?;

        if !credential.has_resource_id() {
            return self.create_gist(token, tournament).await;
        }
        let gist_id = credential.require_resource_id(BACKEND)?;

        let Some(gist) = self.fetch_gist(token, gist_id).await? else {
            info!("Gist {} not found, creating a new one", gist_id);
            return self.create_gist(token, tournament).await;
        };

        let file_name = self.config.namespace.snippet_file_name(tournament);
        let file = gist
            .files
            .get(&file_name)
            .ok_or_else(|| SyncError::NotFound(format!("gist has no file {}", file_name)))?;

        let content = self.file_content(token, file).await?;
        wire::normalize_str(&content, tournament)
    }

    async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let token = credential.require_token(BACKEND)?;

        let url = self.api_url("/user");
        let response =
            send_with_retry("GitHub user", || self.authorized(self.http.get(&url), token))
                .await?;
        let response = ensure_success("GitHub user", response).await?;
        let user: GitHubUser = read_json("GitHub user", response).await?;

        Ok(ConnectionReport {
            backend: self.kind(),
            detail: format!("authenticated as {}", user.login),
        })
    }
}
