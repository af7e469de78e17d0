//! Credential provisioning.
//!
//! Backends ask a [`CredentialProvider`] for a resolved credential on every call and never
//! keep or log it. How the credential was obtained (environment, a setup prompt, a file)
//! is up to the provider.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::SyncError;
use crate::kv::KeyValueStore;

/// Backend-specific secrets: a bearer token and the id of the remote resource.
///
/// Either part may be empty; each backend checks for the parts it needs.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential {
    pub token: String,
    pub resource_id: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn has_resource_id(&self) -> bool {
        !self.resource_id.is_empty()
    }

    /// The token, or `NotConfigured` naming `backend`.
    pub fn require_token(&self, backend: &str) -> Result<&str, SyncError> {
        if self.has_token() {
            Ok(&self.token)
        } else {
            Err(SyncError::NotConfigured(format!("{} requires a token", backend)))
        }
    }

    /// The resource id, or `NotConfigured` naming `backend`.
    pub fn require_resource_id(&self, backend: &str) -> Result<&str, SyncError> {
        if self.has_resource_id() {
            Ok(&self.resource_id)
        } else {
            Err(SyncError::NotConfigured(format!(
                "{} requires a resource id",
                backend
            )))
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &if self.has_token() { "<redacted>" } else { "<empty>" })
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

/// Source of credentials for a backend.
pub trait CredentialProvider: Send + Sync {
    /// The current credential, or `None` when nothing is configured.
    fn credential(&self) -> Option<Credential>;

    /// Persist a resource id the backend created on its own (e.g. a bootstrapped container).
    fn remember_resource_id(&self, resource_id: &str) -> Result<(), SyncError>;

    /// Forget everything this provider holds.
    fn clear(&self) -> Result<(), SyncError>;
}

/// Resolve the credential or fail with `NotConfigured`.
pub fn require_credential(
    provider: &dyn CredentialProvider,
    backend: &str,
) -> Result<Credential, SyncError> {
    provider
        .credential()
        .ok_or_else(|| SyncError::NotConfigured(format!("no credentials for {}", backend)))
}

/// Credentials held in memory, e.g. from configuration or the environment.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: RwLock<Option<Credential>>,
}

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: RwLock::new(Some(credential)),
        }
    }

    /// A provider that reports "not configured".
    pub fn none() -> Self {
        Self::default()
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Option<Credential> {
        self.inner.read().ok().and_then(|c| c.clone())
    }

    fn remember_resource_id(&self, resource_id: &str) -> Result<(), SyncError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| SyncError::Transport("credential lock poisoned".to_string()))?;
        inner.get_or_insert_with(Credential::default).resource_id = resource_id.to_string();
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| SyncError::Transport("credential lock poisoned".to_string()))?;
        *inner = None;
        Ok(())
    }
}

/// Credentials persisted in a [`KeyValueStore`] under `<app>_token` and
/// `<app>_resource_id`.
pub struct StoredCredentials {
    store: Arc<dyn KeyValueStore>,
    token_key: String,
    resource_key: String,
}

impl StoredCredentials {
    pub fn new(store: Arc<dyn KeyValueStore>, app: &str) -> Self {
        Self::with_keys(store, format!("{}_token", app), format!("{}_resource_id", app))
    }

    /// Use explicit keys, for stores written under another layout.
    pub fn with_keys(
        store: Arc<dyn KeyValueStore>,
        token_key: impl Into<String>,
        resource_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            token_key: token_key.into(),
            resource_key: resource_key.into(),
        }
    }

    /// Store a credential supplied by the user, replacing both parts.
    ///
    /// An empty part removes its key, so a token-only setup forgets the old resource id.
    pub fn provision(&self, credential: &Credential) -> Result<(), SyncError> {
        if credential.has_token() {
            self.store.set(&self.token_key, &credential.token)?;
        } else {
            self.store.remove(&self.token_key)?;
        }
        if credential.has_resource_id() {
            self.store.set(&self.resource_key, &credential.resource_id)?;
        } else {
            self.store.remove(&self.resource_key)?;
        }
        debug!(key = %self.token_key, "Stored credentials");
        Ok(())
    }
}

impl CredentialProvider for StoredCredentials {
    fn credential(&self) -> Option<Credential> {
        let token = self.store.get(&self.token_key).ok().flatten();
        let resource_id = self.store.get(&self.resource_key).ok().flatten();
        if token.is_none() && resource_id.is_none() {
            return None;
        }
        Some(Credential {
            token: token.unwrap_or_default(),
            resource_id: resource_id.unwrap_or_default(),
        })
    }

    fn remember_resource_id(&self, resource_id: &str) -> Result<(), SyncError> {
        self.store.set(&self.resource_key, resource_id)
    }

    fn clear(&self) -> Result<(), SyncError> {
        self.store.remove(&self.token_key)?;
        self.store.remove(&self.resource_key)?;
        debug!(key = %self.token_key, "Cleared credentials");
        Ok(())
    }
}
