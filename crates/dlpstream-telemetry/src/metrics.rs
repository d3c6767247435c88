//! Metrics collection and reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for pipeline throughput and failures
///
/// Every increment is also forwarded to the `metrics` facade under a
/// `dlpstream_*` name, so an installed recorder sees the same numbers.
/// Installing one is up to the embedder; the `dlpstream` binary installs a
/// Prometheus exporter when given `--metrics-addr`.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    items_read: AtomicU64,
    items_rejected: AtomicU64,
    batches_dispatched: AtomicU64,
    classifier_retries: AtomicU64,
    batches_dropped: AtomicU64,
    items_dropped: AtomicU64,
    items_redacted: AtomicU64,
    items_forwarded: AtomicU64,
    items_lost: AtomicU64,
    items_replayed: AtomicU64,
    classifier_latency_us: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record an item accepted by the dispatcher
    pub fn record_item_read(&self, source_kind: &'static str) {
        self.inner.items_read.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_items_read_total", "source" => source_kind).increment(1);
    }

    /// Record an item discarded because the intake queue was full
    pub fn record_item_rejected(&self) {
        self.inner.items_rejected.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_items_rejected_total").increment(1);
    }

    /// Record a batch handed to the redaction client
    pub fn record_batch_dispatched(&self, items: u64, latency_us: u64) {
        self.inner.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.inner.items_redacted.fetch_add(items, Ordering::Relaxed);
        self.inner
            .classifier_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_batches_total", "outcome" => "redacted").increment(1);
        ::metrics::histogram!("dlpstream_classifier_latency_us").record(latency_us as f64);
    }

    /// Record a retried classification attempt
    pub fn record_classifier_retry(&self) {
        self.inner.classifier_retries.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_classifier_retries_total").increment(1);
    }

    /// Record a batch given up on
    pub fn record_batch_dropped(&self, items: u64) {
        self.inner.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.inner.items_dropped.fetch_add(items, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_batches_total", "outcome" => "dropped").increment(1);
    }

    /// Record an item delivered to its sinks
    pub fn record_item_forwarded(&self) {
        self.inner.items_forwarded.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_items_forwarded_total").increment(1);
    }

    /// Record an item that no sink configuration accepted
    pub fn record_item_lost(&self) {
        self.inner.items_lost.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_items_lost_total").increment(1);
    }

    /// Record an item skipped because it was already acknowledged
    pub fn record_item_replayed(&self) {
        self.inner.items_replayed.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("dlpstream_items_replayed_total").increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            items_read: load(&self.inner.items_read),
            items_rejected: load(&self.inner.items_rejected),
            batches_dispatched: load(&self.inner.batches_dispatched),
            classifier_retries: load(&self.inner.classifier_retries),
            batches_dropped: load(&self.inner.batches_dropped),
            items_dropped: load(&self.inner.items_dropped),
            items_redacted: load(&self.inner.items_redacted),
            items_forwarded: load(&self.inner.items_forwarded),
            items_lost: load(&self.inner.items_lost),
            items_replayed: load(&self.inner.items_replayed),
            classifier_latency_us: load(&self.inner.classifier_latency_us),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_read: u64,
    pub items_rejected: u64,
    pub batches_dispatched: u64,
    pub classifier_retries: u64,
    pub batches_dropped: u64,
    pub items_dropped: u64,
    pub items_redacted: u64,
    pub items_forwarded: u64,
    pub items_lost: u64,
    pub items_replayed: u64,
    pub classifier_latency_us: u64,
}

impl MetricsSnapshot {
    /// Average classification latency per dispatched batch
    pub fn avg_classifier_latency_us(&self) -> u64 {
        if self.batches_dispatched == 0 {
            0
        } else {
            self.classifier_latency_us / self.batches_dispatched
        }
    }

    /// Items accepted but not yet forwarded, dropped, lost or skipped
    pub fn in_flight(&self) -> u64 {
        self.items_read.saturating_sub(
            self.items_forwarded + self.items_dropped + self.items_lost + self.items_replayed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = MetricsCollector::new();

        for _ in 0..5 {
            metrics.record_item_read("file");
        }
        metrics.record_batch_dispatched(3, 4000);
        metrics.record_item_forwarded();
        metrics.record_item_forwarded();
        metrics.record_item_lost();
        metrics.record_batch_dropped(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_read, 5);
        assert_eq!(snapshot.items_redacted, 3);
        assert_eq!(snapshot.avg_classifier_latency_us(), 4000);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let other = metrics.clone();
        other.record_item_read("remote_log");
        assert_eq!(metrics.snapshot().items_read, 1);
        assert_eq!(metrics.snapshot().in_flight(), 1);
    }
}
