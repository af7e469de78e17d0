use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::freshness::resolve;
use crate::payload::Payload;
use crate::subscription::SubscriptionHandle;

/// The storage transports a [`SyncBackend`] can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single hosted JSON bucket (JSONBin).
    RemoteBucket,
    /// Realtime database with push notifications (Firebase).
    RealtimeStore,
    /// One file per tournament in a snippet container (GitHub Gist).
    SnippetStore,
    /// Obfuscated local key-value storage.
    LocalEncryptedStore,
    /// Query parameters of a shareable URL.
    UrlEmbeddedStore,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::RemoteBucket => "remote_bucket",
            BackendKind::RealtimeStore => "realtime_store",
            BackendKind::SnippetStore => "snippet_store",
            BackendKind::LocalEncryptedStore => "local_encrypted_store",
            BackendKind::UrlEmbeddedStore => "url_embedded_store",
        }
    }

    /// Whether the transport can push change notifications.
    pub fn supports_push(&self) -> bool {
        matches!(self, BackendKind::RealtimeStore)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "remote_bucket" | "jsonbin" => Ok(BackendKind::RemoteBucket),
            "realtime_store" | "firebase" => Ok(BackendKind::RealtimeStore),
            "snippet_store" | "gist" => Ok(BackendKind::SnippetStore),
            "local_encrypted_store" | "local" => Ok(BackendKind::LocalEncryptedStore),
            "url_embedded_store" | "url" => Ok(BackendKind::UrlEmbeddedStore),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Result of a successful `try_save`.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The stamped payload that was written.
    Written(Payload),
    /// The store already held a payload that is not older; nothing was written.
    Skipped { existing_timestamp: i64 },
}

impl SaveOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, SaveOutcome::Written(_))
    }
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub backend: BackendKind,
    pub detail: String,
}

/// Callback invoked with each normalized payload pushed for a subscribed tournament.
pub type ChangeCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Uniform storage contract implemented by every transport.
///
/// Implementors provide the typed `try_*` operations. The provided `save`, `load` and
/// `check_for_updates` collapse every failure into `false` / `None`, so callers cannot
/// tell a transport error from an empty store. Use the `try_*` forms when the cause
/// matters.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Store a stamped copy of `payload` for `tournament`.
    async fn try_save(&self, tournament: &str, payload: &Payload)
        -> Result<SaveOutcome, SyncError>;

    /// Read and normalize the payload stored for `tournament`.
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError>;

    /// Load, then keep the payload only if it is newer than `last_timestamp`.
    ///
    /// The full payload is transferred even when nothing changed.
    async fn try_check_for_updates(
        &self,
        tournament: &str,
        last_timestamp: i64,
    ) -> Result<Option<Payload>, SyncError> {
        let payload = self.try_load(tournament).await?;
        Ok(resolve(payload, last_timestamp).into_fresh())
    }

    /// Probe the transport and credentials without touching tournament data.
    async fn test_connection(&self) -> Result<ConnectionReport, SyncError>;

    /// Push capability, for transports that have one.
    fn as_subscribable(&self) -> Option<&dyn SubscribableBackend> {
        None
    }

    async fn save(&self, tournament: &str, payload: &Payload) -> bool {
        match self.try_save(tournament, payload).await {
            Ok(outcome) => {
                debug!(backend = %self.kind(), tournament, written = outcome.is_written(), "save succeeded");
                true
            }
            Err(e) => {
                warn!(backend = %self.kind(), tournament, cause = e.kind(), "save failed: {}", e);
                false
            }
        }
    }

    async fn load(&self, tournament: &str) -> Option<Payload> {
        match self.try_load(tournament).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(backend = %self.kind(), tournament, cause = e.kind(), "load failed: {}", e);
                None
            }
        }
    }

    async fn check_for_updates(&self, tournament: &str, last_timestamp: i64) -> Option<Payload> {
        match self.try_check_for_updates(tournament, last_timestamp).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(backend = %self.kind(), tournament, cause = e.kind(), "update check failed: {}", e);
                None
            }
        }
    }
}

/// Backends whose transport can push changes.
///
/// At most one live subscription exists per tournament per backend instance; subscribing
/// again replaces the previous listener.
pub trait SubscribableBackend: SyncBackend {
    fn subscribe(
        &self,
        tournament: &str,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, SyncError>;

    /// Tear down the listener for `tournament`. Unknown tournaments are a no-op.
    fn unsubscribe(&self, tournament: &str);

    fn is_subscribed(&self, tournament: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory backend used to exercise the provided trait methods.
    struct FakeBackend {
        stored: Mutex<Option<Payload>>,
        fail_with: Option<SyncError>,
    }

    #[async_trait]
    impl SyncBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::LocalEncryptedStore
        }

        async fn try_save(
            &self,
            tournament: &str,
            payload: &Payload,
        ) -> Result<SaveOutcome, SyncError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            let mut stored = payload.clone();
            stored.tournament = tournament.to_string();
            *self.stored.lock().unwrap() = Some(stored.clone());
            Ok(SaveOutcome::Written(stored))
        }

        async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.stored
                .lock()
                .unwrap()
                .clone()
                .filter(|p| p.tournament == tournament)
                .ok_or_else(|| SyncError::NotFound(tournament.to_string()))
        }

        async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
            Ok(ConnectionReport {
                backend: self.kind(),
                detail: "fake".to_string(),
            })
        }
    }

    fn backend(fail_with: Option<SyncError>) -> FakeBackend {
        FakeBackend {
            stored: Mutex::new(None),
            fail_with,
        }
    }

    #[tokio::test]
    async fn test_public_contract_success() {
        let backend = backend(None);
        let payload = Payload::empty("leagues").with_timestamp(1000);

        assert!(backend.save("leagues", &payload).await);
        assert_eq!(backend.load("leagues").await, Some(payload.clone()));
        assert_eq!(backend.check_for_updates("leagues", 1000).await, None);
        assert_eq!(backend.check_for_updates("leagues", 999).await, Some(payload));
    }

    #[tokio::test]
    async fn test_public_contract_swallows_errors() {
        let backend = backend(Some(SyncError::Transport("boom".to_string())));
        let payload = Payload::empty("leagues");

        assert!(!backend.save("leagues", &payload).await);
        assert_eq!(backend.load("leagues").await, None);
        assert_eq!(backend.check_for_updates("leagues", 0).await, None);

        assert!(matches!(
            backend.try_load("leagues").await,
            Err(SyncError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_not_subscribable_by_default() {
        assert!(backend(None).as_subscribable().is_none());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("gist".parse::<BackendKind>(), Ok(BackendKind::SnippetStore));
        assert_eq!(
            "realtime-store".parse::<BackendKind>(),
            Ok(BackendKind::RealtimeStore)
        );
        assert_eq!("URL".parse::<BackendKind>(), Ok(BackendKind::UrlEmbeddedStore));
        assert!("ftp".parse::<BackendKind>().is_err());
        assert!(BackendKind::RealtimeStore.supports_push());
        assert!(!BackendKind::RemoteBucket.supports_push());
    }
}
