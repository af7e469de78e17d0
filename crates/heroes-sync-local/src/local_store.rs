//! Payload storage in a local [`KeyValueStore`].
//!
//! Entries are base64 over the payload JSON. This is obfuscation, not encryption: anyone
//! with access to the store can decode them. Do not treat it as confidential storage.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use heroes_sync_core::{
    validate_tournament, wire, BackendKind, ConnectionReport, KeyValueStore, Payload, SaveOutcome,
    SyncBackend, SyncError, WriterClock,
};
use tracing::{debug, instrument};

pub const DEFAULT_STORAGE_KEY: &str = "xeetflow_secure_data";

const CHECK_KEY: &str = "heroes_sync_check";

/// Configuration for [`LocalEncryptedStore`].
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Entry keys are `<storage_key>_<tournament>`.
    pub storage_key: String,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Local, network-free backend.
pub struct LocalEncryptedStore {
    store: Arc<dyn KeyValueStore>,
    config: LocalStoreConfig,
    clock: WriterClock,
}

impl LocalEncryptedStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LocalStoreConfig) -> Self {
        Self {
            store,
            config,
            clock: WriterClock::new(),
        }
    }

    fn entry_key(&self, tournament: &str) -> String {
        format!("{}_{}", self.config.storage_key, tournament)
    }

    /// Run `op` against the store on the blocking pool. File-backed stores lock and do IO.
    async fn with_store<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore) -> Result<T, SyncError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| SyncError::Transport(format!("local storage task failed: {}", e)))?
    }
}

/// Reversible encoding of a payload for local storage.
pub fn encode(payload: &Payload) -> Result<String, SyncError> {
    let json = serde_json::to_string(payload)?;
    Ok(STANDARD.encode(json))
}

/// Inverse of [`encode`], validating the tournament.
pub fn decode(encoded: &str, tournament: &str) -> Result<Payload, SyncError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SyncError::ShapeMismatch(format!("invalid base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| SyncError::ShapeMismatch(format!("invalid UTF-8: {}", e)))?;
    wire::normalize_str(&text, tournament)
}

#[async_trait]
impl SyncBackend for LocalEncryptedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalEncryptedStore
    }

    #[instrument(skip(self, payload), level = "debug")]
    async fn try_save(
        &self,
        tournament: &str,
        payload: &Payload,
    ) -> Result<SaveOutcome, SyncError> {
        validate_tournament(tournament)?;

        let stored = payload.stamped(tournament, &self.clock);
        let key = self.entry_key(tournament);
        let encoded = encode(&stored)?;
        {
            let key = key.clone();
            self.with_store(move |store| store.set(&key, &encoded)).await?;
        }

        debug!(
            "Saved {} heroes under {} (timestamp {})",
            stored.total_records, key, stored.timestamp
        );
        Ok(SaveOutcome::Written(stored))
    }

    #[instrument(skip(self), level = "debug")]
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
        validate_tournament(tournament)?;

        let key = self.entry_key(tournament);
        let lookup = key.clone();
        let encoded = self
            .with_store(move |store| store.get(&lookup))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("no local entry {}", key)))?;

        decode(&encoded, tournament)
    }

    async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
        let read_back = self
            .with_store(|store| {
                store.set(CHECK_KEY, "ok")?;
                let read_back = store.get(CHECK_KEY)?;
                store.remove(CHECK_KEY)?;
                Ok(read_back)
            })
            .await?;

        if read_back.as_deref() != Some("ok") {
            return Err(SyncError::Transport(
                "local storage did not return the check value".to_string(),
            ));
        }
        Ok(ConnectionReport {
            backend: self.kind(),
            detail: format!("local storage writable (key prefix {})", self.config.storage_key),
        })
    }
}
