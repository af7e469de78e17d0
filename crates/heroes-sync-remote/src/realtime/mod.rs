//! Firebase Realtime Database backend.
//!
//! The credential's resource id is the database URL and its token, when present, is sent
//! as the `auth` query parameter. Each tournament lives at `<namespace>/<tournament>`.
//! Subscriptions hold a REST event stream open and re-deliver the node after every change.

mod events;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use heroes_sync_core::{
    deliver, require_credential, validate_tournament, wire, BackendKind, ChangeCallback,
    ConnectionReport, Credential, CredentialProvider, Namespace, Payload, SaveOutcome,
    SubscribableBackend, SubscriptionHandle, SubscriptionManager, SyncBackend, SyncError,
    WriterClock,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::http::{ensure_success, read_json, send_with_retry};

pub use events::{EventStreamParser, NodeSnapshot, ServerEvent, StreamUpdate};

const BACKEND: &str = "realtime store";
const PROBE_NODE: &str = "test";
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Configuration for [`RealtimeStore`].
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub namespace: Namespace,
    /// Upper bound for the reconnect delay of subscription streams.
    pub max_backoff: Duration,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::default(),
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[derive(Serialize)]
struct RealtimeRecord<'a> {
    #[serde(flatten)]
    payload: &'a Payload,
    #[serde(rename = "updatedBy")]
    updated_by: &'a str,
}

/// Summary of a stored tournament node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub version: Option<String>,
}

/// Where a node lives and how to authenticate against it.
#[derive(Clone)]
struct NodeTarget {
    url: String,
    token: Option<String>,
}

impl NodeTarget {
    fn new(credential: &Credential, path: &str) -> Result<Self, SyncError> {
        let database = credential.require_resource_id(BACKEND)?;
        Ok(Self {
            url: format!("{}/{}.json", database.trim_end_matches('/'), path),
            token: credential.has_token().then(|| credential.token.clone()),
        })
    }

    fn request(&self, http: &Client, method: Method) -> RequestBuilder {
        let builder = http.request(method, &self.url);
        match &self.token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }
}

/// Realtime database backend.
pub struct RealtimeStore {
    http: Client,
    config: FirebaseConfig,
    credentials: Arc<dyn CredentialProvider>,
    clock: WriterClock,
    writer_id: String,
    subscriptions: SubscriptionManager,
}

impl RealtimeStore {
    pub fn new(config: FirebaseConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            http: Client::new(),
            config,
            credentials,
            clock: WriterClock::new(),
            writer_id: format!("user_{}", &suffix[..9]),
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Opaque id recorded as `updatedBy` on every write from this instance.
    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    fn target(&self, path: &str) -> Result<NodeTarget, SyncError> {
        let credential = require_credential(self.credentials.as_ref(), BACKEND)?;
        NodeTarget::new(&credential, path)
    }

    fn tournament_target(&self, tournament: &str) -> Result<NodeTarget, SyncError> {
        validate_tournament(tournament)?;
        self.target(&self.config.namespace.realtime_path(tournament))
    }

    async fn read_node(&self, label: &str, target: &NodeTarget) -> Result<Value, SyncError> {
        let response =
            send_with_retry(label, || target.request(&self.http, Method::GET)).await?;
        let response = ensure_success(label, response).await?;
        read_json(label, response).await
    }

    /// Record count, timestamps and version of a tournament, or `None` if it was never saved.
    pub async fn stats(&self, tournament: &str) -> Result<Option<RealtimeStats>, SyncError> {
        let target = self.tournament_target(tournament)?;
        let node = self.read_node("Realtime stats", &target).await?;
        if node.is_null() {
            return Ok(None);
        }
        serde_json::from_value(node).map(Some).map_err(SyncError::from)
    }

    /// Remove every tournament under the namespace.
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        let target = self.target(&self.config.namespace.name)?;
        let response = send_with_retry("Realtime clear", || {
            target.request(&self.http, Method::DELETE)
        })
        .await?;
        ensure_success("Realtime clear", response).await?;
        warn!("Cleared all data under {}", self.config.namespace.name);
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for RealtimeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::RealtimeStore
    }

    #[instrument(skip(self, payload), level = "debug")]
    async fn try_save(
        &self,
        tournament: &str,
        payload: &Payload,
    ) -> Result<SaveOutcome, SyncError> {
        let target = self.tournament_target(tournament)?;
        let stored = payload.stamped(tournament, &self.clock);
        let record = RealtimeRecord {
            payload: &stored,
            updated_by: &self.writer_id,
        };

        let response = send_with_retry("Realtime write", || {
            target.request(&self.http, Method::PUT).json(&record)
        })
        .await?;
        ensure_success("Realtime write", response).await?;

        debug!(
            "Wrote {} heroes to {} (timestamp {})",
            stored.total_records,
            self.config.namespace.realtime_path(tournament),
            stored.timestamp
        );
        Ok(SaveOutcome::Written(stored))
    }

    #[instrument(skip(self), level = "debug")]
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
        let target = self.tournament_target(tournament)?;
        let node = self.read_node("Realtime read", &target).await?;
        wire::normalize(node, tournament)
    }

    async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
        let target = self.target(PROBE_NODE)?;
        let probe = json!({ "test": true, "timestamp": Utc::now().timestamp_millis() });

        let response = send_with_retry("Realtime probe write", || {
            target.request(&self.http, Method::PUT).json(&probe)
        })
        .await?;
        ensure_success("Realtime probe write", response).await?;

        let read_back = self.read_node("Realtime probe read", &target).await?;

        let response = send_with_retry("Realtime probe cleanup", || {
            target.request(&self.http, Method::DELETE)
        })
        .await?;
        ensure_success("Realtime probe cleanup", response).await?;

        if read_back.get("test") != Some(&Value::Bool(true)) {
            return Err(SyncError::Transport(
                "realtime database did not return the probe value".to_string(),
            ));
        }
        Ok(ConnectionReport {
            backend: self.kind(),
            detail: format!("read/write probe succeeded as {}", self.writer_id),
        })
    }

    fn as_subscribable(&self) -> Option<&dyn SubscribableBackend> {
        Some(self)
    }
}

impl SubscribableBackend for RealtimeStore {
    fn subscribe(
        &self,
        tournament: &str,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, SyncError> {
        let target = self.tournament_target(tournament)?;
        let channel = listen(
            self.http.clone(),
            target,
            tournament.to_string(),
            on_change,
            self.config.max_backoff,
        );
        self.subscriptions.register(tournament, channel)
    }

    fn unsubscribe(&self, tournament: &str) {
        self.subscriptions.cancel(tournament);
    }

    fn is_subscribed(&self, tournament: &str) -> bool {
        self.subscriptions.is_subscribed(tournament)
    }
}

/// Keep an event stream open on `target`, reconnecting with exponential backoff.
///
/// Runs until the owning subscription aborts it.
async fn listen(
    http: Client,
    target: NodeTarget,
    tournament: String,
    on_change: ChangeCallback,
    max_backoff: Duration,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match open_stream(&http, &target).await {
            Ok(response) => {
                info!(tournament = %tournament, "Realtime stream connected");
                backoff = INITIAL_BACKOFF;

                let mut parser = EventStreamParser::new();
                let mut snapshot = NodeSnapshot::new();
                let mut body = response.bytes_stream();

                'stream: while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(tournament = %tournament, "Realtime stream error: {}", e.without_url());
                            break;
                        }
                    };

                    let events = match parser.feed(&chunk) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(tournament = %tournament, "Dropping realtime stream: {}", e);
                            break;
                        }
                    };

                    for event in events {
                        match snapshot.apply(&event) {
                            Ok(StreamUpdate::Changed) => {
                                deliver(&tournament, snapshot.value().clone(), &on_change);
                            }
                            Ok(StreamUpdate::Ignored) => {}
                            Ok(StreamUpdate::Cancelled(reason)) => {
                                warn!(tournament = %tournament, "Realtime stream cancelled: {}", reason);
                                break 'stream;
                            }
                            Ok(StreamUpdate::AuthRevoked) => {
                                warn!(tournament = %tournament, "Realtime auth revoked");
                                break 'stream;
                            }
                            Err(e) => {
                                debug!(tournament = %tournament, "Skipped malformed {} event: {}", event.event, e);
                            }
                        }
                    }
                }
                info!(tournament = %tournament, "Realtime stream closed");
            }
            Err(e) => {
                warn!(tournament = %tournament, cause = e.kind(), "Realtime stream failed: {}", e);
            }
        }

        debug!(tournament = %tournament, delay_ms = backoff.as_millis() as u64, "Reconnecting");
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, max_backoff);
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    (current * 2).min(max_backoff)
}

async fn open_stream(http: &Client, target: &NodeTarget) -> Result<reqwest::Response, SyncError> {
    let response = target
        .request(http, Method::GET)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| {
            SyncError::Transport(format!(
                "Realtime stream request failed: {}",
                e.without_url()
            ))
        })?;
    ensure_success("Realtime stream", response).await
}
