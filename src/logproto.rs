//! Wire types for the Loki JSON push API.
//!
//! A push request body looks like:
//!
//! ```json
//! {"streams": [{"stream": {"job": "api"}, "values": [["1700000000000000000", "line"]]}]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::LabelSet;

/// Body of a push request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<Stream>,
}

impl PushRequest {
    /// Total number of values across all streams.
    pub fn entries_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

/// A sequence of log lines sharing one label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(rename = "stream")]
    pub labels: LabelSet,

    /// Values in arrival order
    pub values: Vec<Value>,
}

/// A `[timestamp, line]` pair; the timestamp is unix nanoseconds as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value(pub String, pub String);

impl Value {
    pub fn new(timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self(unix_nanos(timestamp).to_string(), line.into())
    }

    pub fn timestamp(&self) -> &str {
        &self.0
    }

    pub fn line(&self) -> &str {
        &self.1
    }
}

/// Nanoseconds since the unix epoch. Computed in `i128` so it is defined for every
/// representable timestamp.
fn unix_nanos(timestamp: DateTime<Utc>) -> i128 {
    i128::from(timestamp.timestamp()) * 1_000_000_000 + i128::from(timestamp.timestamp_subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_timestamp_is_unix_nanos() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let value = Value::new(ts, "hello");
        assert_eq!(value.timestamp(), "1700000000123456789");
        assert_eq!(value.line(), "hello");
    }

    #[test]
    fn test_value_before_epoch() {
        let ts = Utc.timestamp_opt(-1, 500_000_000).unwrap();
        assert_eq!(Value::new(ts, "").timestamp(), "-500000000");
    }

    #[test]
    fn test_push_request_wire_format() {
        let req = PushRequest {
            streams: vec![Stream {
                labels: LabelSet::from([("job", "api")]),
                values: vec![Value("1".to_string(), "first".to_string())],
            }],
        };

        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"streams":[{"stream":{"job":"api"},"values":[["1","first"]]}]}"#
        );
        assert_eq!(req.entries_count(), 1);
    }
}
