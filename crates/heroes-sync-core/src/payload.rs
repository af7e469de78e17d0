use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Format marker written into every stored payload.
pub const PAYLOAD_VERSION: &str = "1.0";

/// A hero record. The sync layer only requires it to be JSON.
pub type Hero = Value;

/// Avatar values keyed by hero identifier.
pub type Avatars = Map<String, Value>;

/// The unit of synchronization for one tournament.
///
/// `timestamp` is a relative version marker in epoch milliseconds; `0` means the writer
/// has not stamped it yet. `total_records` is derived from `heroes` at write time and is
/// not re-verified on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub tournament: String,
    pub heroes: Vec<Hero>,
    pub avatars: Avatars,
    pub timestamp: i64,
    pub total_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl Payload {
    /// Create an unstamped payload.
    pub fn new(tournament: impl Into<String>, heroes: Vec<Hero>, avatars: Avatars) -> Self {
        let total_records = heroes.len();
        Self {
            tournament: tournament.into(),
            heroes,
            avatars,
            timestamp: 0,
            total_records,
            version: None,
            last_updated: None,
        }
    }

    /// The empty payload a freshly bootstrapped resource holds.
    pub fn empty(tournament: impl Into<String>) -> Self {
        Self::new(tournament, Vec::new(), Avatars::new())
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the writer already assigned a version marker.
    pub fn is_stamped(&self) -> bool {
        self.timestamp > 0
    }

    /// Produce the record a backend stores for `tournament`.
    ///
    /// Keeps an existing timestamp, otherwise takes the next tick of `clock`. The
    /// receiver is left untouched.
    pub fn stamped(&self, tournament: &str, clock: &WriterClock) -> Payload {
        let timestamp = if self.is_stamped() {
            clock.observe(self.timestamp);
            self.timestamp
        } else {
            clock.next()
        };

        Payload {
            tournament: tournament.to_string(),
            heroes: self.heroes.clone(),
            avatars: self.avatars.clone(),
            timestamp,
            total_records: self.heroes.len(),
            version: Some(PAYLOAD_VERSION.to_string()),
            last_updated: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    /// Content equality: tournament, heroes and avatars.
    pub fn same_content(&self, other: &Payload) -> bool {
        self.tournament == other.tournament
            && self.heroes == other.heroes
            && self.avatars == other.avatars
    }
}

/// Per-writer source of timestamps.
///
/// Follows the wall clock but never hands out the same or a smaller value twice, so
/// consecutive saves from one adapter instance strictly increase.
#[derive(Debug, Default)]
pub struct WriterClock {
    last: AtomicI64,
}

impl WriterClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Record a timestamp assigned elsewhere so later `next()` values exceed it.
    pub fn observe(&self, timestamp: i64) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }
}

/// Reject empty partition keys before any transport call.
pub fn validate_tournament(tournament: &str) -> Result<(), SyncError> {
    if tournament.trim().is_empty() {
        return Err(SyncError::ShapeMismatch(
            "tournament id must not be empty".to_string(),
        ));
    }
    Ok(())
}
