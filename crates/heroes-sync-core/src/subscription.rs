//! Registry of live per-tournament change listeners.
//!
//! Each subscription is a spawned task that owns the transport channel. The manager keeps
//! at most one task per tournament: registering again aborts the previous task, and
//! cancelling or dropping the manager aborts what is left.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::ChangeCallback;
use crate::error::SyncError;
use crate::wire::normalize;

/// Identifies one registration. Becomes inactive once replaced or cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    tournament: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn tournament(&self) -> &str {
        &self.tournament
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct ActiveSubscription {
    id: u64,
    task: JoinHandle<()>,
}

/// Per-backend-instance subscription registry.
pub struct SubscriptionManager {
    active: DashMap<String, ActiveSubscription>,
    next_id: AtomicU64,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawn `channel` as the listener for `tournament`, replacing any existing one.
    ///
    /// Fails with `NotConfigured` outside a tokio runtime.
    pub fn register<F>(&self, tournament: &str, channel: F) -> Result<SubscriptionHandle, SyncError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = current_runtime("subscriptions")?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = runtime.spawn(channel);

        if let Some(previous) = self
            .active
            .insert(tournament.to_string(), ActiveSubscription { id, task })
        {
            previous.task.abort();
            debug!(
                tournament,
                replaced = previous.id,
                "Replaced existing subscription"
            );
        }

        info!(tournament, subscription = id, "Subscribed to changes");
        Ok(SubscriptionHandle {
            tournament: tournament.to_string(),
            id,
        })
    }

    /// Abort the listener for `tournament`. Returns whether one was registered.
    pub fn cancel(&self, tournament: &str) -> bool {
        match self.active.remove(tournament) {
            Some((_, subscription)) => {
                subscription.task.abort();
                info!(tournament, subscription = subscription.id, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Whether `handle` is still the live registration for its tournament.
    pub fn is_active(&self, handle: &SubscriptionHandle) -> bool {
        self.active
            .get(&handle.tournament)
            .map(|s| s.id == handle.id)
            .unwrap_or(false)
    }

    pub fn is_subscribed(&self, tournament: &str) -> bool {
        self.active.contains_key(tournament)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Abort every listener.
    pub fn clear(&self) {
        self.active.retain(|_, subscription| {
            subscription.task.abort();
            false
        });
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Handle of the runtime the caller runs on, or `NotConfigured` naming `purpose`.
pub fn current_runtime(purpose: &str) -> Result<Handle, SyncError> {
    Handle::try_current().map_err(|_| {
        SyncError::NotConfigured(format!("{} need a running tokio runtime", purpose))
    })
}

/// Normalize a pushed document and hand it to `on_change`.
///
/// Documents that are not a payload for `tournament` are dropped. Returns whether the
/// callback ran.
pub fn deliver(tournament: &str, raw: Value, on_change: &ChangeCallback) -> bool {
    match normalize(raw, tournament) {
        Ok(payload) => {
            on_change(payload);
            true
        }
        Err(e) => {
            debug!(tournament, cause = e.kind(), "Dropped pushed document: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// A listener that never finishes; its sender is dropped when the task is aborted.
    fn pending_listener() -> (impl Future<Output = ()> + Send + 'static, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let fut = async move {
            let _guard = tx;
            std::future::pending::<()>().await;
        };
        (fut, rx)
    }

    #[tokio::test]
    async fn test_register_and_cancel() {
        let manager = SubscriptionManager::new();
        let (listener, closed) = pending_listener();

        let handle = manager.register("leagues", listener).unwrap();
        assert!(manager.is_active(&handle));
        assert!(manager.is_subscribed("leagues"));
        assert_eq!(handle.tournament(), "leagues");

        assert!(manager.cancel("leagues"));
        assert!(!manager.is_active(&handle));
        assert!(closed.await.is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_previous() {
        let manager = SubscriptionManager::new();
        let (first, first_closed) = pending_listener();
        let (second, _second_closed) = pending_listener();

        let first_handle = manager.register("leagues", first).unwrap();
        let second_handle = manager.register("leagues", second).unwrap();

        assert_eq!(manager.len(), 1);
        assert!(!manager.is_active(&first_handle));
        assert!(manager.is_active(&second_handle));
        assert_ne!(first_handle.id(), second_handle.id());
        assert!(first_closed.await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let manager = SubscriptionManager::new();
        assert!(!manager.cancel("nobody"));
        assert!(!manager.cancel("nobody"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_drop_aborts_listeners() {
        let manager = SubscriptionManager::new();
        let (a, a_closed) = pending_listener();
        let (b, b_closed) = pending_listener();
        manager.register("a", a).unwrap();
        manager.register("b", b).unwrap();

        drop(manager);

        assert!(a_closed.await.is_err());
        assert!(b_closed.await.is_err());
    }

    #[test]
    fn test_register_outside_runtime_is_not_configured() {
        let manager = SubscriptionManager::new();
        let result = manager.register("leagues", async {});
        assert!(matches!(result, Err(SyncError::NotConfigured(_))));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_deliver_filters_mismatched_tournament() {
        let received: Arc<Mutex<Vec<Payload>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let on_change: ChangeCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        assert!(!deliver("A", json!({"tournament": "B", "heroes": []}), &on_change));
        assert!(!deliver("A", Value::Null, &on_change));
        assert!(deliver(
            "A",
            json!({"tournament": "A", "heroes": [1], "timestamp": 5}),
            &on_change
        ));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].timestamp, 5);
        assert_eq!(received[0].total_records, 1);
    }
}
