//! Per-tenant accumulation of log entries.
//!
//! A [`Batch`] groups entries into streams keyed by the text form of their
//! label set and tracks how many line bytes it holds and how old it is. The
//! dispatcher keeps one batch per tenant and hands it to the sender once it is
//! full or old enough.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::logproto::{PushRequest, Stream, Value};
use crate::model::LabelSet;

/// A single log line on its way to a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Tenant the line belongs to; empty in single-tenant mode
    pub tenant_id: String,

    /// Labels identifying the stream, with the reserved tenant label already removed
    pub labels: LabelSet,

    pub value: Value,
}

impl Entry {
    pub fn new(
        tenant_id: impl Into<String>,
        labels: LabelSet,
        timestamp: DateTime<Utc>,
        line: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            labels,
            value: Value::new(timestamp, line),
        }
    }

    /// Bytes this entry counts for in a batch: the line only, labels excluded.
    pub fn size_bytes(&self) -> usize {
        self.value.line().len()
    }
}

/// Pending log streams for one tenant.
#[derive(Debug)]
pub struct Batch {
    streams: HashMap<String, Stream>,
    bytes: usize,
    created_at: Instant,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(Vec::<Entry>::new())
    }
}

/// Borrowed view of a batch serialized as a push request.
#[derive(Serialize)]
struct EncodedRequest<'a> {
    streams: Vec<&'a Stream>,
}

impl Batch {
    /// Create a batch seeded with the given entries.
    pub fn new(entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut batch = Self {
            streams: HashMap::new(),
            bytes: 0,
            created_at: Instant::now(),
        };

        for entry in entries {
            batch.add(entry);
        }

        batch
    }

    /// Add an entry, appending to the stream with the same label set if there is one.
    pub fn add(&mut self, entry: Entry) {
        self.bytes += entry.size_bytes();

        let key = entry.labels.to_string();
        if let Some(stream) = self.streams.get_mut(&key) {
            stream.values.push(entry.value);
            return;
        }

        self.streams.insert(
            key,
            Stream {
                labels: entry.labels,
                values: vec![entry.value],
            },
        );
    }

    /// Accumulated line bytes.
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    /// Size the batch would have after adding `entry`, computed without modifying it.
    pub fn size_bytes_after(&self, entry: &Entry) -> usize {
        self.bytes + entry.size_bytes()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn entry_count(&self) -> usize {
        self.streams.values().map(|s| s.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Encode the batch as a JSON push request.
    ///
    /// Returns the body together with the number of encoded entries.
    pub fn encode(&self) -> Result<(Vec<u8>, usize), serde_json::Error> {
        let request = EncodedRequest {
            streams: self.streams.values().collect(),
        };
        let body = serde_json::to_vec(&request)?;
        Ok((body, self.entry_count()))
    }

    /// Build an owned push request from the batch contents.
    pub fn create_push_request(&self) -> (PushRequest, usize) {
        let request = PushRequest {
            streams: self.streams.values().cloned().collect(),
        };
        let count = request.entries_count();
        (request, count)
    }
}
