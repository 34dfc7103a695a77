//! Log entry type for JSONL-based logging.
//!
//! Each entry is a self-contained JSON object, so files survive appends from
//! several peer instances running at once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Name of the process-level instance that wrote the line
    pub instance: String,

    /// Module path (e.g. "webtalk_core::room::driver")
    pub target: String,

    pub msg: String,

    /// Room id taken from the innermost enclosing room span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    /// Peer id taken from the innermost enclosing room span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Span path from the root, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            room: None,
            peer: None,
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn with_room(mut self, room: Option<String>, peer: Option<String>) -> Self {
        self.room = room;
        self.peer = peer;
        self
    }

    /// Who emitted the line: the peer when known, else the instance.
    pub fn origin(&self) -> &str {
        self.peer.as_deref().unwrap_or(&self.instance)
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serialization() {
        let entry = JsonLogEntry::new("info", "demo", "webtalk_core::room", "User synced")
            .with_room(Some("6578".to_string()), Some("01hx".to_string()));

        let json = entry.to_json_line().unwrap();
        assert!(json.contains("\"level\":\"info\""));
        assert!(json.contains("\"room\":\"6578\""));
        assert!(!json.contains("\"fields\""));

        let parsed = JsonLogEntry::from_json_line(&json).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.origin(), "01hx");
    }

    #[test]
    fn test_origin_falls_back_to_instance() {
        let entry = JsonLogEntry::new("warn", "cli", "webtalk", "Dropped")
            .with_fields(serde_json::json!({ "size": 300_000 }));
        assert_eq!(entry.origin(), "cli");
        assert!(entry.to_json_line().unwrap().contains("\"size\":300000"));
    }
}
