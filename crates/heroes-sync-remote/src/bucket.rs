//! JSONBin-style hosted JSON bucket.
//!
//! One bin per configured resource id. A save replaces the whole bin with the stamped
//! payload; a load reads the latest version and unwraps its `record` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use heroes_sync_core::{
    require_credential, validate_tournament, wire, BackendKind, ConnectionReport,
    CredentialProvider, Namespace, Payload, SaveOutcome, SyncBackend, SyncError, WriterClock,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::http::{ensure_success, read_json, send_with_retry};

pub const DEFAULT_JSONBIN_URL: &str = "https://api.jsonbin.io/v3";

const BACKEND: &str = "remote bucket";

/// Configuration for [`RemoteBucket`].
#[derive(Debug, Clone)]
pub struct JsonBinConfig {
    /// API root, e.g. `https://api.jsonbin.io/v3`.
    pub base_url: String,
    pub namespace: Namespace,
}

impl Default for JsonBinConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_JSONBIN_URL.to_string(),
            namespace: Namespace::default(),
        }
    }
}

#[derive(Deserialize)]
struct BinEnvelope {
    #[serde(default)]
    record: Value,
}

/// Hosted JSON bucket backend.
pub struct RemoteBucket {
    http: Client,
    config: JsonBinConfig,
    credentials: Arc<dyn CredentialProvider>,
    clock: WriterClock,
}

impl RemoteBucket {
    pub fn new(config: JsonBinConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: Client::new(),
            config,
            credentials,
            clock: WriterClock::new(),
        }
    }

    fn bin_url(&self, bin_id: &str) -> String {
        format!("{}/b/{}", self.config.base_url.trim_end_matches('/'), bin_id)
    }

    async fn fetch_latest(&self, master_key: &str, bin_id: &str) -> Result<Value, SyncError> {
        let url = format!("{}/latest", self.bin_url(bin_id));
        let response = send_with_retry("JSONBin read", || {
            self.http.get(&url).header("X-Master-Key", master_key)
        })
        .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!("bin {} does not exist", bin_id)));
        }
        let response = ensure_success("JSONBin read", response).await?;
        let envelope: BinEnvelope = read_json("JSONBin read", response).await?;
        Ok(envelope.record)
    }
}

#[async_trait]
impl SyncBackend for RemoteBucket {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteBucket
    }

    #[instrument(skip(self, payload), level = "debug")]
    async fn try_save(
        &self,
        tournament: &str,
        payload: &Payload,
    ) -> Result<SaveOutcome, SyncError> {
        validate_tournament(tournament)?;
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let master_key = credential.require_token(BACKEND)?;
        let bin_id = credential.require_resource_id(BACKEND)?;

        let stored = payload.stamped(tournament, &self.clock);
        let url = self.bin_url(bin_id);
        let bin_name = self.config.namespace.bucket_name(tournament);

        let response = send_with_retry("JSONBin write", || {
            self.http
                .put(&url)
                .header("X-Master-Key", master_key)
                .header("X-Bin-Name", &bin_name)
                .json(&stored)
        })
        .await?;
        ensure_success("JSONBin write", response).await?;

        debug!(
            "Wrote {} heroes to bin {} (timestamp {})",
            stored.total_records, bin_id, stored.timestamp
        );
        Ok(SaveOutcome::Written(stored))
    }

    #[instrument(skip(self), level = "debug")]
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
        validate_tournament(tournament)?;
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let master_key = credential.require_token(BACKEND)?;
        let bin_id = credential.require_resource_id(BACKEND)?;

        let record = self.fetch_latest(master_key, bin_id).await?;
        wire::normalize(record, tournament)
    }

    async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        let master_key = credential.require_token(BACKEND)?;
        let bin_id = credential.require_resource_id(BACKEND)?;

        self.fetch_latest(master_key, bin_id).await?;
        Ok(ConnectionReport {
            backend: self.kind(),
            detail: format!("bin {} is readable", bin_id),
        })
    }
}
