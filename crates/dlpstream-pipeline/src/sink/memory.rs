//! In-memory sink

use super::{Sink, SinkRecord};
use async_trait::async_trait;
use dlpstream_core::{Error, Result, Sequence};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Keeps acknowledged records in memory
///
/// Replays of an already stored `(source_id, sequence)` are acknowledged
/// but not stored twice; they are counted in [`MemorySink::duplicates`].
/// Failures can be scripted with [`MemorySink::fail_next`] to exercise retry
/// paths.
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    records: Mutex<Vec<SinkRecord>>,
    seen: Mutex<HashSet<(String, Sequence)>>,
    fail_remaining: AtomicU32,
    attempts: AtomicUsize,
    duplicates: AtomicUsize,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            fail_remaining: AtomicU32::new(0),
            attempts: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` writes with `SinkUnavailable`
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Stored records in arrival order
    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stored messages in arrival order
    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    /// Every write attempt, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Acknowledged replays of already stored records
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &SinkRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::sink_unavailable(&self.name, "scripted failure"));
        }

        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((record.source_id.clone(), record.sequence));
        if fresh {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.clone());
        } else {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
