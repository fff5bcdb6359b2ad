//! Structured log sink.
//!
//! Collaborators receive a sink explicitly instead of reaching for a
//! process-wide logger; tests swap in [`MemoryLogSink`] and assert on the
//! captured records.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

/// Destination for structured log records.
///
/// `debug`/`error` carry a message plus key-value context; `info_json`
/// carries a full JSON record on a named channel (one channel per audit
/// stream: `WebUI`, `RadiusAuthorize`, `RadiusAccounting`, ...).
pub trait LogSink: Send + Sync {
    /// Emit a debug record with key-value context.
    fn debug(&self, message: &str, fields: &[(&str, &str)]);

    /// Emit an error record with key-value context.
    fn error(&self, message: &str, fields: &[(&str, &str)]);

    /// Emit a JSON record on a named channel.
    fn info_json(&self, channel: &str, record: serde_json::Value);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        (**self).debug(message, fields);
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        (**self).error(message, fields);
    }

    fn info_json(&self, channel: &str, record: serde_json::Value) {
        (**self).info_json(channel, record);
    }
}

/// Sink that forwards everything to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        debug!(context = %join_fields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        error!(context = %join_fields(fields), "{message}");
    }

    fn info_json(&self, channel: &str, record: serde_json::Value) {
        info!(channel = %channel, record = %record, "log record");
    }
}

fn join_fields(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One captured record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// `"debug"`, `"error"`, or the channel name of a JSON record.
    pub channel: String,
    /// Message for text records, empty for JSON records.
    pub message: String,
    /// Key-value context for text records.
    pub fields: Vec<(String, String)>,
    /// Payload for JSON records.
    pub json: Option<serde_json::Value>,
}

/// Sink that keeps every record in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured records, in emission order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Captured JSON records on a single channel.
    pub fn channel_records(&self, channel: &str) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.channel == channel)
            .filter_map(|r| r.json.clone())
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        self.records.lock().push(LogRecord {
            channel: "debug".into(),
            message: message.into(),
            fields: own_fields(fields),
            json: None,
        });
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        self.records.lock().push(LogRecord {
            channel: "error".into(),
            message: message.into(),
            fields: own_fields(fields),
            json: None,
        });
    }

    fn info_json(&self, channel: &str, record: serde_json::Value) {
        self.records.lock().push(LogRecord {
            channel: channel.into(),
            message: String::new(),
            fields: Vec::new(),
            json: Some(record),
        });
    }
}

fn own_fields(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_captures_text() {
        let sink = MemoryLogSink::new();
        sink.error("boom", &[("user", "alice"), ("ip", "203.0.113.7")]);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, "error");
        assert_eq!(records[0].message, "boom");
        assert_eq!(records[0].fields[0], ("user".into(), "alice".into()));
    }

    #[test]
    fn test_memory_sink_filters_by_channel() {
        let sink = MemoryLogSink::new();
        sink.info_json("WebUI", json!({"status": 200}));
        sink.info_json("RadiusAuthorize", json!({"status": 401}));

        let webui = sink.channel_records("WebUI");
        assert_eq!(webui.len(), 1);
        assert_eq!(webui[0]["status"], 200);
    }
}
