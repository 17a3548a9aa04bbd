use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use courier_batcher::{AttributeValue, BatchItem};

/// The severity of a log entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Full auxiliary information.
    Trace,
    /// Information usually relevant to debugging.
    Debug,
    /// Regular application flow.
    Info,
    /// Undesirable behavior.
    Warn,
    /// A handled error.
    Error,
    /// An error terminating the application.
    Fatal,
}

/// A structured log entry captured by the host application.
///
/// Logs flow through the item batcher: they are enriched with scope
/// attributes, buffered, and delivered in `log` envelope items.
#[derive(Debug, Serialize)]
pub struct TelemetryLog {
    /// Seconds since the UNIX epoch, with sub-second precision.
    pub timestamp: f64,
    /// The severity of this entry.
    pub level: LogLevel,
    /// The log message.
    pub body: String,
    /// The trace this entry was captured in, set by the batcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Typed attributes, merged with injected defaults at capture time.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl TelemetryLog {
    /// Creates a log entry timestamped now.
    pub fn new<S: Into<String>>(level: LogLevel, body: S) -> Self {
        Self {
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            level,
            body: body.into(),
            trace_id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute to this entry.
    pub fn with_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl BatchItem for TelemetryLog {
    fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttributeValue> {
        &mut self.attributes
    }

    fn set_trace_id(&mut self, trace_id: String) {
        self.trace_id = Some(trace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_log() {
        let mut log = TelemetryLog::new(LogLevel::Warn, "disk almost full");
        log.timestamp = 1700000000.25;
        let log = log.with_attribute("disk.free_mb", 512i64);

        let json: serde_json::Value = serde_json::to_value(&log).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["body"], "disk almost full");
        assert_eq!(json["timestamp"], 1700000000.25);
        assert_eq!(json["attributes"]["disk.free_mb"]["value"], 512);
        assert!(json.get("trace_id").is_none());
    }
}
