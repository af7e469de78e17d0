use std::sync::Arc;

use heroes_sync_core::{
    BackendKind, Credential, CredentialProvider, KeyValueStore, StaticCredentials,
    StoredCredentials, SyncBackend,
};
use heroes_sync_local::{
    FileKeyValueStore, LocalEncryptedStore, LocalStoreConfig, UrlEmbeddedStore, UrlStoreConfig,
};
use heroes_sync_remote::{
    FirebaseConfig, GistConfig, JsonBinConfig, RealtimeStore, RemoteBucket, SnippetStore,
};
use tracing::{debug, info};

use crate::config::Config;

/// A configured backend. `url_store` is set when the backend is the URL store, so the
/// caller can print the resulting location.
pub struct BuiltBackend {
    pub backend: Arc<dyn SyncBackend>,
    pub url_store: Option<Arc<UrlEmbeddedStore>>,
}

pub fn local_store(config: &Config) -> Arc<dyn KeyValueStore> {
    Arc::new(FileKeyValueStore::new(config.store_path()))
}

pub fn stored_credentials(config: &Config) -> StoredCredentials {
    StoredCredentials::new(local_store(config), &config.credentials_key)
}

/// Inline credentials win; otherwise use what `setup` stored.
pub fn credential_provider(config: &Config) -> Arc<dyn CredentialProvider> {
    if config.has_inline_credentials() {
        debug!("Using credentials from arguments/environment");
        return Arc::new(StaticCredentials::new(Credential::new(
            config.token.clone().unwrap_or_default(),
            config.resource_id.clone().unwrap_or_default(),
        )));
    }
    debug!("Using stored credentials from {}", config.store_path().display());
    Arc::new(stored_credentials(config))
}

/// Build the backend selected by `config.backend`.
pub fn create_backend(config: &Config, credentials: Arc<dyn CredentialProvider>) -> BuiltBackend {
    let namespace = config.namespace();
    let mut url_store = None;

    let backend: Arc<dyn SyncBackend> = match config.backend {
        BackendKind::RemoteBucket => Arc::new(RemoteBucket::new(
            JsonBinConfig {
                base_url: config.jsonbin_url.clone(),
                namespace,
            },
            credentials,
        )),
        BackendKind::SnippetStore => Arc::new(SnippetStore::new(
            GistConfig {
                base_url: config.github_api_url.clone(),
                namespace,
            },
            credentials,
        )),
        BackendKind::RealtimeStore => Arc::new(RealtimeStore::new(
            FirebaseConfig {
                namespace,
                ..FirebaseConfig::default()
            },
            credentials,
        )),
        BackendKind::LocalEncryptedStore => Arc::new(LocalEncryptedStore::new(
            local_store(config),
            LocalStoreConfig {
                storage_key: config.storage_key.clone(),
            },
        )),
        BackendKind::UrlEmbeddedStore => {
            let store = Arc::new(UrlEmbeddedStore::new(
                config.url.clone(),
                UrlStoreConfig {
                    max_url_length: config.max_url_length,
                    ..UrlStoreConfig::default()
                },
            ));
            url_store = Some(store.clone());
            store
        }
    };

    info!("Using {} backend", backend.kind());
    BuiltBackend { backend, url_store }
}
