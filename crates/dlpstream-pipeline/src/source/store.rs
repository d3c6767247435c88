//! Remote log stores
//!
//! HTTP wire format: `GET {base}/v1/logs/{name}/entries?after={cursor}` returns
//! `{"entries": [{"position": 7, "payload": {"text": "..."}}, ...]}` where a
//! payload is either `{"text": "..."}` or `{"structured": {...}}`.

use async_trait::async_trait;
use dlpstream_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Body of a log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Structured(serde_json::Value),
}

impl Payload {
    /// Text handed to the classifier
    pub fn render(&self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Structured(value) => Ok(serde_json::to_string(value)?),
        }
    }
}

/// One entry of a remote log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Store-assigned position, increasing within a log
    pub position: u64,
    pub payload: Payload,
}

impl LogEntry {
    pub fn text(position: u64, text: impl Into<String>) -> Self {
        Self {
            position,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn structured(position: u64, value: serde_json::Value) -> Self {
        Self {
            position,
            payload: Payload::Structured(value),
        }
    }
}

/// Source of remote log entries
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Entries of `log_name` after `after`
    ///
    /// Stores may return overlapping windows, entries at or before `after`,
    /// or entries out of order; callers filter.
    async fn list_entries(&self, log_name: &str, after: u64) -> Result<Vec<LogEntry>>;

    fn name(&self) -> &str;
}

#[derive(Deserialize)]
struct EntriesResponse {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

/// Log store reached over HTTP/JSON
pub struct HttpLogStore {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl HttpLogStore {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let base = reqwest::Url::parse(base)
            .map_err(|e| Error::config(format!("invalid log store URL {}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(format!("log store URL {} cannot be a base", base)));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base })
    }

    fn entries_url(&self, log_name: &str, after: u64) -> Result<reqwest::Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("log store URL {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["v1", "logs", log_name, "entries"]);
        url.query_pairs_mut().append_pair("after", &after.to_string());
        Ok(url)
    }
}

#[async_trait]
impl LogStore for HttpLogStore {
    async fn list_entries(&self, log_name: &str, after: u64) -> Result<Vec<LogEntry>> {
        let url = self.entries_url(log_name, after)?;
        let unavailable = |e: reqwest::Error| Error::source_unavailable(log_name, e);

        let response = self.client.get(url).send().await.map_err(unavailable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::source_unavailable(
                log_name,
                format!("log store returned {}", status),
            ));
        }

        let body: EntriesResponse = response.json().await.map_err(unavailable)?;
        let mut entries = Vec::with_capacity(body.entries.len());
        for raw in body.entries {
            match serde_json::from_value::<LogEntry>(raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(log = %log_name, "Skipping malformed log entry: {}", e),
            }
        }

        debug!(log = %log_name, after, entries = entries.len(), "log store polled");
        Ok(entries)
    }

    fn name(&self) -> &str {
        "http_log_store"
    }
}

/// In-memory log store
///
/// Positions are assigned from 1 per log. [`MemoryLogStore::overlap`] makes
/// every listing also repeat that many entries before the cursor, and
/// [`MemoryLogStore::fail_next`] scripts outages.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    logs: Mutex<HashMap<String, Vec<LogEntry>>>,
    overlap: AtomicUsize,
    fail_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload and return its position
    pub fn append(&self, log_name: &str, payload: Payload) -> u64 {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let log = logs.entry(log_name.to_string()).or_default();
        let position = log.last().map_or(1, |e| e.position + 1);
        log.push(LogEntry { position, payload });
        position
    }

    pub fn append_text(&self, log_name: &str, text: impl Into<String>) -> u64 {
        self.append(log_name, Payload::Text(text.into()))
    }

    /// Repeat `n` already seen entries in every listing
    pub fn overlap(&self, n: usize) {
        self.overlap.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` listings with `SourceUnavailable`
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of listings served or failed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn list_entries(&self, log_name: &str, after: u64) -> Result<Vec<LogEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::source_unavailable(log_name, "scripted outage"));
        }

        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(log) = logs.get(log_name) else {
            return Ok(Vec::new());
        };

        let first_new = log.partition_point(|e| e.position <= after);
        let start = first_new.saturating_sub(self.overlap.load(Ordering::SeqCst));
        // newest first
        Ok(log[start..].iter().rev().cloned().collect())
    }

    fn name(&self) -> &str {
        "memory_log_store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_payload_renders_as_json() {
        let entry = LogEntry::structured(3, json!({"user": "a@b.com"}));
        assert_eq!(entry.payload.render().unwrap(), r#"{"user":"a@b.com"}"#);
        assert_eq!(LogEntry::text(1, "hi").payload.render().unwrap(), "hi");
    }

    #[test]
    fn test_entry_wire_format() {
        let entry: LogEntry =
            serde_json::from_value(json!({"position": 7, "payload": {"text": "hello"}})).unwrap();
        assert_eq!(entry, LogEntry::text(7, "hello"));
        assert!(serde_json::from_value::<LogEntry>(json!({"position": 7})).is_err());
    }

    #[test]
    fn test_entries_url_escapes_log_name() {
        let store = HttpLogStore::new("http://logs.internal:8080/", Duration::from_secs(1)).unwrap();
        let url = store.entries_url("app/errors", 42).unwrap();
        assert_eq!(
            url.as_str(),
            "http://logs.internal:8080/v1/logs/app%2Ferrors/entries?after=42"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpLogStore::new("not a url", Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_overlap_and_outage() {
        let store = MemoryLogStore::new();
        for text in ["a", "b", "c"] {
            store.append_text("app", text);
        }

        let all = store.list_entries("app", 0).await.unwrap();
        assert_eq!(all.iter().map(|e| e.position).collect::<Vec<_>>(), vec![3, 2, 1]);

        store.overlap(2);
        let window = store.list_entries("app", 3).await.unwrap();
        assert_eq!(window.iter().map(|e| e.position).collect::<Vec<_>>(), vec![3, 2]);

        store.fail_next(1);
        assert!(store.list_entries("app", 0).await.is_err());
        assert!(store.list_entries("app", 0).await.is_ok());
        assert_eq!(store.calls(), 4);
    }
}
