//! Firebase REST streaming: `text/event-stream` framing and the local node mirror.
//!
//! The server sends `put` and `patch` events carrying `{"path", "data"}` relative to the
//! listened node. Applying them in order to a [`NodeSnapshot`] reproduces the node's
//! current value.

use heroes_sync_core::SyncError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Longest line the parser buffers while waiting for its newline.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence.
#[derive(Debug)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    max_line_length: usize,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            max_line_length,
        }
    }

    /// Feed a chunk and return the events it completes.
    ///
    /// A line longer than the limit clears all pending state and fails with
    /// `ShapeMismatch`; the caller should drop the stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ServerEvent>, SyncError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        if self.buffer.len() > self.max_line_length {
            let pending = self.buffer.len();
            self.reset();
            return Err(SyncError::ShapeMismatch(format!(
                "event stream line exceeds {} bytes ({} pending)",
                self.max_line_length, pending
            )));
        }
        Ok(events)
    }

    fn reset(&mut self) {
        self.buffer = Vec::new();
        self.event = None;
        self.data.clear();
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = ServerEvent {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(event)
    }
}

/// What applying one event did to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Changed,
    Ignored,
    /// The server closed the stream, e.g. after a rules change denied access.
    Cancelled(String),
    /// The auth token expired or was revoked.
    AuthRevoked,
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

/// Local mirror of the listened node.
#[derive(Debug, Default)]
pub struct NodeSnapshot {
    root: Value,
}

impl NodeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn apply(&mut self, event: &ServerEvent) -> Result<StreamUpdate, SyncError> {
        match event.event.as_str() {
            "put" => {
                let update: PathData = serde_json::from_str(&event.data)?;
                set_at(&mut self.root, &update.path, update.data);
                Ok(StreamUpdate::Changed)
            }
            "patch" => {
                let update: PathData = serde_json::from_str(&event.data)?;
                let Value::Object(children) = update.data else {
                    return Err(SyncError::ShapeMismatch(
                        "patch data must be an object".to_string(),
                    ));
                };
                for (key, value) in children {
                    set_at(&mut self.root, &format!("{}/{}", update.path, key), value);
                }
                Ok(StreamUpdate::Changed)
            }
            "cancel" => Ok(StreamUpdate::Cancelled(event.data.clone())),
            "auth_revoked" => Ok(StreamUpdate::AuthRevoked),
            _ => Ok(StreamUpdate::Ignored),
        }
    }
}

/// Write `data` at a slash-separated `path`; `null` removes the child.
fn set_at(root: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = &mut node[*segment];
    }

    if data.is_null() {
        if let Value::Object(map) = node {
            map.remove(*last);
        }
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node[*last] = data;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> ServerEvent {
        ServerEvent {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parser_dispatches_on_blank_line() {
        let mut parser = EventStreamParser::new();
        let events = parser
            .feed(b"event: put\ndata: {\"path\":\"/\",\"data\":1}\n\n")
            .unwrap();
        assert_eq!(
            events,
            vec![ServerEvent {
                event: "put".to_string(),
                data: "{\"path\":\"/\",\"data\":1}".to_string()
            }]
        );
    }

    #[test]
    fn test_parser_handles_split_chunks_and_crlf() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"event: pa").unwrap().is_empty());
        assert!(parser.feed(b"tch\r\ndata: {\"a\"").unwrap().is_empty());
        let events = parser.feed(b":1}\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "patch");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_parser_keeps_split_utf8() {
        let mut parser = EventStreamParser::new();
        let bytes = "event: put\ndata: \"é\"\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(parser.feed(&bytes[..split]).unwrap().is_empty());
        let events = parser.feed(&bytes[split..]).unwrap();
        assert_eq!(events[0].data, "\"é\"");
    }

    #[test]
    fn test_parser_skips_comments_and_joins_data_lines() {
        let mut parser = EventStreamParser::new();
        let events = parser
            .feed(b": ping\n\nevent: keep-alive\ndata: null\n\ndata: a\ndata: b\n\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "keep-alive");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "a\nb");
    }

    #[test]
    fn test_parser_rejects_line_without_newline_past_limit() {
        let mut parser = EventStreamParser::with_max_line_length(16);
        assert!(parser.feed(b"event: put\ndata: 0123").unwrap().is_empty());
        assert!(matches!(
            parser.feed(b"456789abcdef"),
            Err(SyncError::ShapeMismatch(_))
        ));

        // pending state was discarded; the next complete event parses cleanly
        let events = parser.feed(b"\nevent: put\ndata: 1\n\n").unwrap();
        assert_eq!(
            events,
            vec![ServerEvent {
                event: "put".to_string(),
                data: "1".to_string()
            }]
        );
    }

    #[test]
    fn test_put_at_root_replaces_snapshot() {
        let mut snapshot = NodeSnapshot::new();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": {"timestamp": 1}})))
            .unwrap();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": {"timestamp": 2}})))
            .unwrap();
        assert_eq!(snapshot.value(), &json!({"timestamp": 2}));
    }

    #[test]
    fn test_put_at_child_path() {
        let mut snapshot = NodeSnapshot::new();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": {"heroes": [1], "timestamp": 1}})))
            .unwrap();
        snapshot
            .apply(&event("put", json!({"path": "/avatars/7", "data": "url"})))
            .unwrap();
        assert_eq!(
            snapshot.value(),
            &json!({"heroes": [1], "timestamp": 1, "avatars": {"7": "url"}})
        );
    }

    #[test]
    fn test_patch_merges_children_and_null_removes() {
        let mut snapshot = NodeSnapshot::new();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": {"a": 1, "b": 2}})))
            .unwrap();
        let update = snapshot
            .apply(&event("patch", json!({"path": "/", "data": {"a": null, "c": 3}})))
            .unwrap();
        assert_eq!(update, StreamUpdate::Changed);
        assert_eq!(snapshot.value(), &json!({"b": 2, "c": 3}));
    }

    #[test]
    fn test_null_put_at_root_clears() {
        let mut snapshot = NodeSnapshot::new();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": {"a": 1}})))
            .unwrap();
        snapshot
            .apply(&event("put", json!({"path": "/", "data": null})))
            .unwrap();
        assert!(snapshot.value().is_null());
    }

    #[test]
    fn test_control_events() {
        let mut snapshot = NodeSnapshot::new();
        assert_eq!(
            snapshot.apply(&event("keep-alive", Value::Null)).unwrap(),
            StreamUpdate::Ignored
        );
        assert_eq!(
            snapshot
                .apply(&ServerEvent {
                    event: "cancel".to_string(),
                    data: "permission denied".to_string()
                })
                .unwrap(),
            StreamUpdate::Cancelled("permission denied".to_string())
        );
        assert_eq!(
            snapshot.apply(&event("auth_revoked", Value::Null)).unwrap(),
            StreamUpdate::AuthRevoked
        );
    }

    #[test]
    fn test_malformed_put_is_error() {
        let mut snapshot = NodeSnapshot::new();
        let result = snapshot.apply(&ServerEvent {
            event: "put".to_string(),
            data: "not json".to_string(),
        });
        assert!(matches!(result, Err(SyncError::ShapeMismatch(_))));
    }
}
