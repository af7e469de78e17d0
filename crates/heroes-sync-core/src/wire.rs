//! Normalization of stored documents into [`Payload`].
//!
//! Every transport hands back loosely shaped JSON: fields may be missing or `null`,
//! timestamps may arrive as floats. Missing collections default to empty, a missing
//! `totalRecords` is derived from `heroes`, and the `tournament` field must equal the
//! requested key.

use serde::Deserialize;
use serde_json::{Number, Value};

use crate::error::SyncError;
use crate::payload::{Avatars, Hero, Payload};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default)]
    tournament: Option<String>,
    #[serde(default)]
    heroes: Option<Vec<Hero>>,
    #[serde(default)]
    avatars: Option<Avatars>,
    #[serde(default)]
    timestamp: Option<Number>,
    #[serde(default)]
    total_records: Option<usize>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Convert a raw stored document into a payload for `tournament`.
///
/// `null` is [`SyncError::NotFound`]; anything that is not a payload object, or a payload
/// stored for another tournament, is [`SyncError::ShapeMismatch`].
pub fn normalize(raw: Value, tournament: &str) -> Result<Payload, SyncError> {
    if raw.is_null() {
        return Err(SyncError::NotFound(format!(
            "no payload stored for tournament {}",
            tournament
        )));
    }
    if !raw.is_object() {
        return Err(SyncError::ShapeMismatch(format!(
            "expected a JSON object, got {}",
            json_type(&raw)
        )));
    }

    let wire: WirePayload = serde_json::from_value(raw)?;

    match wire.tournament.as_deref() {
        Some(stored) if stored == tournament => {}
        Some(stored) => {
            return Err(SyncError::ShapeMismatch(format!(
                "stored tournament {} does not match requested {}",
                stored, tournament
            )))
        }
        None => {
            return Err(SyncError::ShapeMismatch(
                "stored payload has no tournament field".to_string(),
            ))
        }
    }

    let heroes = wire.heroes.unwrap_or_default();
    let total_records = wire.total_records.unwrap_or(heroes.len());
    let timestamp = wire
        .timestamp
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
        .unwrap_or(0);

    Ok(Payload {
        tournament: tournament.to_string(),
        heroes,
        avatars: wire.avatars.unwrap_or_default(),
        timestamp,
        total_records,
        version: wire.version,
        last_updated: wire.last_updated,
    })
}

/// Parse a JSON document held as text (file content, decoded query parameter).
pub fn normalize_str(text: &str, tournament: &str) -> Result<Payload, SyncError> {
    let raw: Value = serde_json::from_str(text)?;
    normalize(raw, tournament)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
