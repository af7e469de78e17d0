//! Payload embedded in the query string of a shareable URL.
//!
//! The payload is serialized as `{tournament, heroes, avatars, timestamp}`, base64
//! encoded into the `data` parameter, with the tournament in a `tournament` parameter
//! beside it. Other query parameters are left alone. A URL longer than the configured
//! limit is rejected and the location is not changed.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use heroes_sync_core::{
    current_runtime, validate_tournament, wire, Avatars, BackendKind, ConnectionReport, Hero,
    Payload, SaveOutcome, SyncBackend, SyncError, WriterClock,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DATA_PARAM: &str = "data";
pub const TOURNAMENT_PARAM: &str = "tournament";

/// Practical URL length most clients and servers accept.
pub const DEFAULT_MAX_URL_LENGTH: usize = 2048;
pub const DEFAULT_RESAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for [`UrlEmbeddedStore`].
#[derive(Debug, Clone)]
pub struct UrlStoreConfig {
    pub max_url_length: usize,
    pub resave_interval: Duration,
}

impl Default for UrlStoreConfig {
    fn default() -> Self {
        Self {
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            resave_interval: DEFAULT_RESAVE_INTERVAL,
        }
    }
}

#[derive(Serialize)]
struct UrlRecord<'a> {
    tournament: &'a str,
    heroes: &'a [Hero],
    avatars: &'a Avatars,
    timestamp: i64,
}

struct UrlState {
    location: RwLock<Url>,
    config: UrlStoreConfig,
    clock: WriterClock,
}

impl UrlState {
    fn write(&self, tournament: &str, payload: &Payload) -> Result<Payload, SyncError> {
        validate_tournament(tournament)?;

        let stored = payload.stamped(tournament, &self.clock);
        let json = serde_json::to_string(&UrlRecord {
            tournament,
            heroes: &stored.heroes,
            avatars: &stored.avatars,
            timestamp: stored.timestamp,
        })?;
        let encoded = STANDARD.encode(json);

        let mut location = self
            .location
            .write()
            .map_err(|_| SyncError::Transport("location lock poisoned".to_string()))?;
        let next = with_payload_params(&location, tournament, &encoded);

        let size = next.as_str().len();
        if size > self.config.max_url_length {
            return Err(SyncError::PayloadTooLarge {
                size,
                limit: self.config.max_url_length,
            });
        }

        *location = next;
        debug!("Embedded {} heroes into URL ({} chars)", stored.total_records, size);
        Ok(stored)
    }

    fn read(&self, tournament: &str) -> Result<Payload, SyncError> {
        validate_tournament(tournament)?;

        let location = self.current()?;
        let mut data = None;
        let mut url_tournament = None;
        for (key, value) in location.query_pairs() {
            match &*key {
                DATA_PARAM => data = Some(value.into_owned()),
                TOURNAMENT_PARAM => url_tournament = Some(value.into_owned()),
                _ => {}
            }
        }

        let data = match (data, url_tournament) {
            (Some(data), Some(t)) if t == tournament => data,
            _ => {
                return Err(SyncError::NotFound(format!(
                    "URL carries no data for tournament {}",
                    tournament
                )))
            }
        };

        let bytes = STANDARD
            .decode(data.as_bytes())
            .map_err(|e| SyncError::ShapeMismatch(format!("invalid base64 in URL: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| SyncError::ShapeMismatch(format!("invalid UTF-8 in URL: {}", e)))?;

        let mut payload = wire::normalize_str(&text, tournament)?;
        payload.total_records = payload.heroes.len();
        Ok(payload)
    }

    fn current(&self) -> Result<Url, SyncError> {
        self.location
            .read()
            .map(|l| l.clone())
            .map_err(|_| SyncError::Transport("location lock poisoned".to_string()))
    }
}

/// Copy of `url` with the payload parameters replaced, other parameters kept in order.
fn with_payload_params(url: &Url, tournament: &str, encoded: &str) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != DATA_PARAM && k != TOURNAMENT_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut next = url.clone();
    next.set_query(None);
    {
        let mut pairs = next.query_pairs_mut();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(TOURNAMENT_PARAM, tournament);
        pairs.append_pair(DATA_PARAM, encoded);
    }
    next
}

/// Running periodic re-save task.
struct PeriodicSave {
    tournament: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeriodicSave {
    fn stop(self) {
        let _ = self.stop.send(true);
        self.task.abort();
        debug!("Stopped periodic URL save for {}", self.tournament);
    }
}

/// Backend that keeps the payload in a location URL.
///
/// Optionally re-saves on a fixed interval to keep the shareable URL fresh; the task is
/// stopped by [`UrlEmbeddedStore::stop_periodic_save`], by starting another one, or by
/// dropping the store.
pub struct UrlEmbeddedStore {
    state: Arc<UrlState>,
    resave: Mutex<Option<PeriodicSave>>,
}

impl UrlEmbeddedStore {
    pub fn new(location: Url, config: UrlStoreConfig) -> Self {
        Self {
            state: Arc::new(UrlState {
                location: RwLock::new(location),
                config,
                clock: WriterClock::new(),
            }),
            resave: Mutex::new(None),
        }
    }

    /// The current location, including any embedded payload.
    pub fn location(&self) -> Result<Url, SyncError> {
        self.state.current()
    }

    /// Replace the location, e.g. when a shared link is opened.
    pub fn set_location(&self, location: Url) -> Result<(), SyncError> {
        let mut current = self
            .state
            .location
            .write()
            .map_err(|_| SyncError::Transport("location lock poisoned".to_string()))?;
        *current = location;
        Ok(())
    }

    /// Re-save `payload` every `interval` (default from config) until stopped.
    ///
    /// The first re-save happens one interval after the call. A task that is already
    /// running is stopped first. Fails with `NotConfigured` outside a tokio runtime.
    pub fn start_periodic_save(
        &self,
        tournament: &str,
        payload: Payload,
        interval: Option<Duration>,
    ) -> Result<(), SyncError> {
        validate_tournament(tournament)?;
        let interval = interval.unwrap_or(self.state.config.resave_interval);
        if interval.is_zero() {
            return Err(SyncError::NotConfigured(
                "re-save interval must be greater than zero".to_string(),
            ));
        }

        let runtime = current_runtime("periodic URL saves")?;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let task_tournament = tournament.to_string();

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = state.write(&task_tournament, &payload) {
                            warn!(tournament = %task_tournament, cause = e.kind(), "Periodic URL save failed: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let previous = self
            .resave
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(PeriodicSave {
                tournament: tournament.to_string(),
                stop: stop_tx,
                task,
            });
        if let Some(previous) = previous {
            previous.stop();
        }

        info!(
            tournament,
            interval_secs = interval.as_secs_f64(),
            "Started periodic URL save"
        );
        Ok(())
    }

    /// Stop the periodic re-save. Returns whether one was running.
    pub fn stop_periodic_save(&self) -> bool {
        let running = self.resave.lock().unwrap_or_else(|e| e.into_inner()).take();
        match running {
            Some(task) => {
                task.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_periodic_save_running(&self) -> bool {
        self.resave
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| !p.task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for UrlEmbeddedStore {
    fn drop(&mut self) {
        self.stop_periodic_save();
    }
}

#[async_trait]
impl SyncBackend for UrlEmbeddedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::UrlEmbeddedStore
    }

    #[instrument(skip(self, payload), level = "debug")]
    async fn try_save(
        &self,
        tournament: &str,
        payload: &Payload,
    ) -> Result<SaveOutcome, SyncError> {
        self.state.write(tournament, payload).map(SaveOutcome::Written)
    }

    #[instrument(skip(self), level = "debug")]
    async fn try_load(&self, tournament: &str) -> Result<Payload, SyncError> {
        self.state.read(tournament)
    }

    async fn test_connection(&self) -> Result<ConnectionReport, SyncError> {
        let location = self.state.current()?;
        Ok(ConnectionReport {
            backend: self.kind(),
            detail: format!(
                "{} chars of {} used",
                location.as_str().len(),
                self.state.config.max_url_length
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> UrlEmbeddedStore {
        let location = Url::parse("https://app.example.com/board?lang=en").unwrap();
        UrlEmbeddedStore::new(location, UrlStoreConfig::default())
    }

    fn leagues_payload() -> Payload {
        let mut avatars = Avatars::new();
        avatars.insert("1".to_string(), json!("url"));
        Payload::new("leagues", vec![json!({"id": 1, "name": "X"})], avatars).with_timestamp(1000)
    }

    fn param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let store = store();

        assert!(store.save("leagues", &leagues_payload()).await);

        let loaded = store.load("leagues").await.unwrap();
        assert_eq!(loaded.heroes, vec![json!({"id": 1, "name": "X"})]);
        assert_eq!(loaded.avatars["1"], json!("url"));
        assert_eq!(loaded.timestamp, 1000);
        assert_eq!(loaded.total_records, 1);

        assert!(store.check_for_updates("leagues", 1000).await.is_none());
        assert!(store.check_for_updates("leagues", 999).await.is_some());
    }

    #[tokio::test]
    async fn test_save_keeps_other_params() {
        let store = store();
        store.save("leagues", &leagues_payload()).await;
        store.save("leagues", &leagues_payload()).await;

        let location = store.location().unwrap();
        assert_eq!(param(&location, "lang").as_deref(), Some("en"));
        assert_eq!(param(&location, TOURNAMENT_PARAM).as_deref(), Some("leagues"));
        assert_eq!(
            location.query_pairs().filter(|(k, _)| k == DATA_PARAM).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_other_tournament_in_url_is_not_found() {
        let store = store();
        store.save("leagues", &leagues_payload()).await;

        assert!(store.load("cup").await.is_none());
        assert!(matches!(
            store.try_load("cup").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_embedded_tournament_must_match() {
        let store = store();
        let foreign = serde_json::to_string(&json!({"tournament": "B", "heroes": []})).unwrap();
        let encoded = STANDARD.encode(foreign);
        let url = Url::parse_with_params(
            "https://app.example.com/",
            &[("tournament", "A"), ("data", encoded.as_str())],
        )
        .unwrap();
        store.set_location(url).unwrap();

        assert!(matches!(
            store.try_load("A").await,
            Err(SyncError::ShapeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let store = UrlEmbeddedStore::new(
            Url::parse("https://app.example.com/").unwrap(),
            UrlStoreConfig {
                max_url_length: 256,
                ..Default::default()
            },
        );
        let heroes = (0..50).map(|i| json!({"id": i, "name": "hero"})).collect();
        let big = Payload::new("leagues", heroes, Avatars::new());

        let before = store.location().unwrap();
        assert!(!store.save("leagues", &big).await);
        assert!(matches!(
            store.try_save("leagues", &big).await,
            Err(SyncError::PayloadTooLarge { limit: 256, .. })
        ));
        assert_eq!(store.location().unwrap(), before);
    }

    #[tokio::test]
    async fn test_never_saved_is_not_found() {
        assert!(store().load("leagues").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_save_runs_until_stopped() {
        let store = store();
        let blank = store.location().unwrap();

        store
            .start_periodic_save("leagues", leagues_payload(), Some(Duration::from_secs(30)))
            .unwrap();
        assert!(store.is_periodic_save_running());
        assert!(param(&store.location().unwrap(), DATA_PARAM).is_none());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.load("leagues").await.unwrap().timestamp, 1000);

        assert!(store.stop_periodic_save());
        assert!(!store.stop_periodic_save());
        store.set_location(blank.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.location().unwrap(), blank);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_task() {
        let store = store();
        store
            .start_periodic_save("leagues", leagues_payload(), Some(Duration::from_secs(10)))
            .unwrap();
        store
            .start_periodic_save(
                "cup",
                Payload::empty("cup").with_timestamp(7),
                Some(Duration::from_secs(10)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let location = store.location().unwrap();
        assert_eq!(param(&location, TOURNAMENT_PARAM).as_deref(), Some("cup"));
        assert!(store.load("leagues").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let store = store();
        assert!(store
            .start_periodic_save("leagues", leagues_payload(), Some(Duration::ZERO))
            .is_err());
        assert!(!store.is_periodic_save_running());
    }

    #[test]
    fn test_periodic_save_outside_runtime_is_not_configured() {
        let store = store();
        let result = store.start_periodic_save("leagues", leagues_payload(), None);
        assert!(matches!(result, Err(SyncError::NotConfigured(_))));
        assert!(!store.is_periodic_save_running());
    }
}
