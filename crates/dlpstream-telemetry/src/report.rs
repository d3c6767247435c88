//! Operator-visible failure reports
//!
//! Failures the pipeline contains rather than propagates (dropped batches,
//! lost deliveries, items left behind at shutdown) are logged at `error`
//! level with structured fields and kept in a bounded history so callers and
//! tests can inspect them.

use chrono::{DateTime, Utc};
use dlpstream_core::SequenceRange;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

const DEFAULT_HISTORY: usize = 1024;

/// A batch whose items will never be forwarded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedBatch {
    pub source_id: String,
    pub range: SequenceRange,
    pub items: usize,
    pub attempts: u32,
    pub reason: String,
}

/// An item a sink gave up on, either a required one or the last sink standing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LostDelivery {
    pub source_id: String,
    pub sequence: dlpstream_core::Sequence,
    pub sink: String,
    pub attempts: u32,
    pub reason: String,
}

/// Items accepted from a source but unresolved when the pipeline stopped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Undelivered {
    pub source_id: String,
    pub items: usize,
    pub range: Option<SequenceRange>,
}

/// One entry in the report history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    DroppedBatch(DroppedBatch),
    LostDelivery(LostDelivery),
    Undelivered(Undelivered),
}

#[derive(Debug, Clone, Serialize)]
struct Stamped {
    at: DateTime<Utc>,
    report: Report,
}

/// Records and logs failure reports
#[derive(Clone)]
pub struct Reporter {
    history: Arc<Mutex<VecDeque<Stamped>>>,
    capacity: usize,
}

impl Reporter {
    /// Create a reporter keeping the default history size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    /// Create a reporter keeping at most `capacity` reports
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Report a dropped batch
    pub fn dropped_batch(&self, report: DroppedBatch) {
        error!(
            source = %report.source_id,
            range = %report.range,
            items = report.items,
            attempts = report.attempts,
            reason = %report.reason,
            "dropped batch"
        );
        self.push(Report::DroppedBatch(report));
    }

    /// Report a delivery lost on a required sink
    pub fn lost_delivery(&self, report: LostDelivery) {
        error!(
            source = %report.source_id,
            sequence = %report.sequence,
            sink = %report.sink,
            attempts = report.attempts,
            reason = %report.reason,
            "delivery lost"
        );
        self.push(Report::LostDelivery(report));
    }

    /// Report items left undelivered at shutdown
    pub fn undelivered(&self, report: Undelivered) {
        match &report.range {
            Some(range) => warn!(
                source = %report.source_id,
                items = report.items,
                range = %range,
                "items undelivered at shutdown"
            ),
            None => warn!(
                source = %report.source_id,
                items = report.items,
                "items undelivered at shutdown"
            ),
        }
        self.push(Report::Undelivered(report));
    }

    /// Snapshot of recorded reports, oldest first
    pub fn reports(&self) -> Vec<Report> {
        self.lock().iter().map(|s| s.report.clone()).collect()
    }

    /// Recorded dropped-batch reports, oldest first
    pub fn dropped_batches(&self) -> Vec<DroppedBatch> {
        self.lock()
            .iter()
            .filter_map(|s| match &s.report {
                Report::DroppedBatch(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded lost-delivery reports, oldest first
    pub fn lost_deliveries(&self) -> Vec<LostDelivery> {
        self.lock()
            .iter()
            .filter_map(|s| match &s.report {
                Report::LostDelivery(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    /// Serialize the history as JSON lines
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for stamped in self.lock().iter() {
            out.push_str(&serde_json::to_string(stamped)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn push(&self, report: Report) {
        let mut history = self.lock();
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(Stamped {
            at: Utc::now(),
            report,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Stamped>> {
        // poisoned history is still readable
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
