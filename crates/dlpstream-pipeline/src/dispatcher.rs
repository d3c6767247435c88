//! Batch dispatcher
//!
//! Every registered source gets a lane: a bounded intake queue, an assembler
//! task that cuts batches by size or age, and a dispatch task that redacts
//! batches one at a time and forwards the results in order. Lanes of
//! different sources run concurrently; within a lane nothing is reordered.

use crate::batch::{Batch, BatchBuffer};
use crate::forwarder::SinkForwarder;
use crate::retry::RetryPolicy;
use dlpstream_core::{
    DetectorSet, Error, RawItem, RedactedItem, Result, Sequence, SequenceRange, Source, SourceKind,
};
use dlpstream_redaction::RedactionClient;
use dlpstream_telemetry::{DroppedBatch, MetricsCollector, Reporter, Undelivered};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Assembled batches waiting for the dispatch task, per lane
const BATCH_QUEUE_DEPTH: usize = 2;

/// What a source does when its intake queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for capacity
    #[default]
    Block,
    /// Discard the item and count it
    Drop,
}

/// Whether the dispatcher took an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected,
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_batch_items: usize,
    pub max_batch_bytes: usize,
    pub flush_interval: Duration,
    pub intake_capacity: usize,
    pub backpressure: Backpressure,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_items: 50,
            max_batch_bytes: 512 * 1024,
            flush_interval: Duration::from_secs(2),
            intake_capacity: 256,
            backpressure: Backpressure::Block,
            retry: RetryPolicy::classifier(),
        }
    }
}

/// Sequences accepted by a lane and not yet forwarded, dropped or lost
#[derive(Debug, Default)]
struct LaneTracker {
    pending: Mutex<BTreeSet<Sequence>>,
}

impl LaneTracker {
    fn accept(&self, sequence: Sequence) {
        self.lock().insert(sequence);
    }

    fn resolve(&self, sequence: Sequence) {
        self.lock().remove(&sequence);
    }

    fn remaining(&self) -> (usize, Option<SequenceRange>) {
        let pending = self.lock();
        let range = match (pending.first(), pending.last()) {
            (Some(first), Some(last)) => Some(SequenceRange {
                first: *first,
                last: *last,
            }),
            _ => None,
        };
        (pending.len(), range)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<Sequence>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum SendFailure {
    Full,
    Closed,
}

/// Submission side of one source's lane
#[derive(Clone)]
pub struct SourceHandle {
    source_id: Arc<str>,
    kind: SourceKind,
    tx: mpsc::Sender<RawItem>,
    backpressure: Backpressure,
    tracker: Arc<LaneTracker>,
    metrics: MetricsCollector,
}

impl SourceHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Hand an item to the dispatcher
    ///
    /// Under [`Backpressure::Block`] this waits while the intake queue is
    /// full; under [`Backpressure::Drop`] the item is discarded instead and
    /// `Rejected` is returned. Fails only when the lane has shut down.
    pub async fn submit(&self, item: RawItem) -> Result<Admission> {
        if item.source_id.as_str() != &*self.source_id {
            return Err(Error::internal(format!(
                "item for {} submitted to lane {}",
                item.source_id, self.source_id
            )));
        }

        let sequence = item.sequence;
        let reserved = match self.backpressure {
            Backpressure::Block => self.tx.reserve().await.map_err(|_| SendFailure::Closed),
            Backpressure::Drop => self.tx.try_reserve().map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => SendFailure::Full,
                mpsc::error::TrySendError::Closed(()) => SendFailure::Closed,
            }),
        };

        match reserved {
            Ok(permit) => {
                // tracked before the lane can see the item
                self.tracker.accept(sequence);
                permit.send(item);
                self.metrics.record_item_read(self.kind.as_str());
                Ok(Admission::Accepted)
            }
            Err(SendFailure::Full) => {
                self.metrics.record_item_rejected();
                warn!(source = %self.source_id, sequence = %sequence, "intake queue full, item dropped");
                Ok(Admission::Rejected)
            }
            Err(SendFailure::Closed) => {
                Err(Error::internal(format!("lane for {} is closed", self.source_id)))
            }
        }
    }
}

struct Lane {
    source_id: String,
    tracker: Arc<LaneTracker>,
    assembler: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Shared by a lane's dispatch task
struct LaneContext {
    client: Arc<dyn RedactionClient>,
    detectors: Arc<DetectorSet>,
    forwarder: SinkForwarder,
    retry: RetryPolicy,
    tracker: Arc<LaneTracker>,
    metrics: MetricsCollector,
    reporter: Reporter,
}

/// Groups raw items into batches, redacts them and forwards the results
pub struct Dispatcher {
    config: DispatcherConfig,
    client: Arc<dyn RedactionClient>,
    detectors: Arc<DetectorSet>,
    forwarder: SinkForwarder,
    metrics: MetricsCollector,
    reporter: Reporter,
    lanes: Vec<Lane>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        client: Arc<dyn RedactionClient>,
        detectors: Arc<DetectorSet>,
        forwarder: SinkForwarder,
        metrics: MetricsCollector,
        reporter: Reporter,
    ) -> Self {
        Self {
            config,
            client,
            detectors,
            forwarder,
            metrics,
            reporter,
            lanes: Vec::new(),
        }
    }

    /// Open a lane for `source` and return its submission handle
    ///
    /// The lane closes once every clone of the handle is dropped.
    pub fn register(&mut self, source: &Source) -> Result<SourceHandle> {
        if self.lanes.iter().any(|l| l.source_id == source.id) {
            return Err(Error::config(format!("duplicate source: {}", source.id)));
        }

        let (tx, rx) = mpsc::channel(self.config.intake_capacity.max(1));
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_DEPTH);
        let tracker = Arc::new(LaneTracker::default());

        let buffer = BatchBuffer::new(
            source.id.clone(),
            self.config.max_batch_items,
            self.config.max_batch_bytes,
        );
        let assembler = tokio::spawn(assemble(rx, batch_tx, buffer, self.config.flush_interval));

        let context = LaneContext {
            client: self.client.clone(),
            detectors: self.detectors.clone(),
            forwarder: self.forwarder.clone(),
            retry: self.config.retry.clone(),
            tracker: tracker.clone(),
            metrics: self.metrics.clone(),
            reporter: self.reporter.clone(),
        };
        let worker = tokio::spawn(dispatch(batch_rx, context));

        self.lanes.push(Lane {
            source_id: source.id.clone(),
            tracker: tracker.clone(),
            assembler,
            worker,
        });
        debug!(source = %source.id, kind = %source.kind, "lane registered");

        Ok(SourceHandle {
            source_id: Arc::from(source.id.as_str()),
            kind: source.kind,
            tx,
            backpressure: self.config.backpressure,
            tracker,
            metrics: self.metrics.clone(),
        })
    }

    /// Wait for every lane to flush and finish, giving up after `timeout`
    ///
    /// Call once all source handles are dropped. Items still unresolved when
    /// the lanes finish or time out are reported and returned.
    pub async fn drain(self, timeout: Duration) -> Vec<Undelivered> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut undelivered = Vec::new();

        for mut lane in self.lanes {
            if tokio::time::timeout_at(deadline, &mut lane.worker).await.is_err() {
                warn!(source = %lane.source_id, "drain timed out, abandoning lane");
                lane.assembler.abort();
                lane.worker.abort();
            }

            let (items, range) = lane.tracker.remaining();
            if items > 0 {
                let report = Undelivered {
                    source_id: lane.source_id.clone(),
                    items,
                    range,
                };
                self.reporter.undelivered(report.clone());
                undelivered.push(report);
            }
        }

        info!(undelivered = undelivered.len(), "Dispatcher drained");
        undelivered
    }
}

/// Cut batches from the intake queue by size, bytes or age
async fn assemble(
    mut rx: mpsc::Receiver<RawItem>,
    batch_tx: mpsc::Sender<Batch>,
    mut buffer: BatchBuffer,
    flush_interval: Duration,
) {
    let mut flush_at: Option<tokio::time::Instant> = None;

    loop {
        let mut ready = Vec::new();
        let mut closed = false;

        tokio::select! {
            received = rx.recv() => match received {
                Some(item) => {
                    if buffer.is_empty() {
                        flush_at = Some(tokio::time::Instant::now() + flush_interval);
                    }
                    ready = buffer.push(item);
                    if buffer.is_empty() {
                        flush_at = None;
                    } else if !ready.is_empty() {
                        flush_at = Some(tokio::time::Instant::now() + flush_interval);
                    }
                }
                None => {
                    ready.extend(buffer.take());
                    closed = true;
                }
            },
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(tokio::time::Instant::now)), if flush_at.is_some() => {
                ready.extend(buffer.take());
                flush_at = None;
            }
        }

        for batch in ready {
            debug!(source = %batch.source_id, items = batch.len(), "batch assembled");
            if batch_tx.send(batch).await.is_err() {
                warn!("dispatch task gone, assembler stopping");
                return;
            }
        }

        if closed {
            return;
        }
    }
}

/// Redact and forward batches strictly in arrival order
async fn dispatch(mut batch_rx: mpsc::Receiver<Batch>, ctx: LaneContext) {
    while let Some(batch) = batch_rx.recv().await {
        ctx.process(batch).await;
    }
}

impl LaneContext {
    async fn process(&self, batch: Batch) {
        let texts = batch.payloads();
        let mut attempts = 0u32;

        let redacted = loop {
            attempts += 1;
            let start = Instant::now();

            match self.client.redact_batch(&texts, &self.detectors).await {
                Ok(out) if out.len() == texts.len() => {
                    self.metrics
                        .record_batch_dispatched(out.len() as u64, start.elapsed().as_micros() as u64);
                    break out;
                }
                Ok(out) => {
                    let reason = format!(
                        "redaction returned {} items for {} inputs",
                        out.len(),
                        texts.len()
                    );
                    self.drop_batch(&batch, attempts, reason);
                    return;
                }
                Err(e) if e.is_retryable() && self.retry.allows_retry(attempts) => {
                    let delay = self.retry.backoff(attempts);
                    warn!(
                        source = %batch.source_id,
                        attempt = attempts,
                        ?delay,
                        "Redaction failed, retrying: {}",
                        e
                    );
                    self.metrics.record_classifier_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.drop_batch(&batch, attempts, e.to_string());
                    return;
                }
            }
        };

        for (raw, text) in batch.items.iter().zip(redacted) {
            let outcome = self.forwarder.forward(RedactedItem::from_raw(raw, text)).await;
            if !outcome.delivered {
                debug!(source = %raw.source_id, sequence = %raw.sequence, "item not delivered");
            }
            self.tracker.resolve(raw.sequence);
        }
    }

    fn drop_batch(&self, batch: &Batch, attempts: u32, reason: String) {
        self.metrics.record_batch_dropped(batch.len() as u64);
        if let Some(range) = batch.range() {
            self.reporter.dropped_batch(DroppedBatch {
                source_id: batch.source_id.clone(),
                range,
                items: batch.len(),
                attempts,
                reason,
            });
        }
        for item in &batch.items {
            self.tracker.resolve(item.sequence);
        }
    }
}
