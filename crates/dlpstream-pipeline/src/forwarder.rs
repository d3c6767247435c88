//! Sink forwarder
//!
//! Fans each redacted item out to every configured sink. Each sink has its
//! own queue and worker task, so a slow sink never reorders or delays writes
//! to another. Per item and sink the delivery moves through
//! `pending -> sent -> acknowledged | failed`, and `failed` is retried against
//! the same sink until the retry budget is spent, at which point the delivery
//! is `lost`.

use crate::ledger::DeliveryLedger;
use crate::retry::RetryPolicy;
use crate::sink::{ConfiguredSink, Sink, SinkRecord};
use dlpstream_core::{Error, RedactedItem, Result, Sequence};
use dlpstream_telemetry::{LostDelivery, MetricsCollector, Reporter};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Queue depth per sink worker
const SINK_QUEUE_DEPTH: usize = 64;

/// Where a single item stands with a single sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sent { attempt: u32 },
    Acknowledged { attempts: u32 },
    Failed { attempt: u32, reason: String },
    Lost { attempts: u32, reason: String },
}

impl DeliveryState {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }
}

/// Final state of one item on one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDelivery {
    pub sink: String,
    pub required: bool,
    pub state: DeliveryState,
}

/// Result of forwarding one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub source_id: String,
    pub sequence: Sequence,
    pub deliveries: Vec<SinkDelivery>,

    /// At least one sink acknowledged and every required sink acknowledged
    pub delivered: bool,

    /// The item was acknowledged in an earlier run and was not sent again
    pub replayed: bool,
}

/// Forwarder settings
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub retry: RetryPolicy,

    /// Upper bound on a single write attempt
    pub attempt_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::sink(),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

struct SinkJob {
    record: Arc<SinkRecord>,
    ack: oneshot::Sender<DeliveryState>,
}

struct SinkChannel {
    name: String,
    required: bool,
    tx: mpsc::Sender<SinkJob>,
}

struct ForwarderInner {
    channels: Vec<SinkChannel>,
    sinks: Vec<Arc<dyn Sink>>,
    ledger: Arc<DeliveryLedger>,
    metrics: MetricsCollector,
    reporter: Reporter,
}

/// Delivers redacted items to the configured sinks
#[derive(Clone)]
pub struct SinkForwarder {
    inner: Arc<ForwarderInner>,
}

/// Worker tasks owned by a forwarder; join them after the last forwarder clone is gone
pub struct SinkWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl SinkWorkers {
    /// Wait for every sink worker to finish its queue
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Sink worker ended abnormally: {}", e);
            }
        }
    }
}

impl SinkForwarder {
    /// Start one worker per sink
    pub fn start(
        sinks: Vec<ConfiguredSink>,
        config: ForwarderConfig,
        ledger: Arc<DeliveryLedger>,
        metrics: MetricsCollector,
        reporter: Reporter,
    ) -> Result<(Self, SinkWorkers)> {
        if sinks.is_empty() {
            return Err(Error::config("at least one sink is required"));
        }

        let mut channels = Vec::with_capacity(sinks.len());
        let mut handles = Vec::with_capacity(sinks.len());
        let mut all = Vec::with_capacity(sinks.len());

        for configured in sinks {
            let (tx, rx) = mpsc::channel(SINK_QUEUE_DEPTH);
            let sink = configured.sink.clone();
            channels.push(SinkChannel {
                name: sink.name().to_string(),
                required: configured.required,
                tx,
            });
            all.push(sink.clone());
            handles.push(tokio::spawn(run_sink(sink, rx, config.clone())));
        }

        let forwarder = Self {
            inner: Arc::new(ForwarderInner {
                channels,
                sinks: all,
                ledger,
                metrics,
                reporter,
            }),
        };
        Ok((forwarder, SinkWorkers { handles }))
    }

    /// Forward one item and wait for every sink's final state
    pub async fn forward(&self, item: RedactedItem) -> ForwardOutcome {
        let inner = &self.inner;

        if inner.ledger.is_delivered(&item.source_id, item.sequence) {
            debug!(source = %item.source_id, sequence = %item.sequence, "skipping already acknowledged item");
            inner.metrics.record_item_replayed();
            return ForwardOutcome {
                source_id: item.source_id,
                sequence: item.sequence,
                deliveries: Vec::new(),
                delivered: true,
                replayed: true,
            };
        }

        let record = Arc::new(SinkRecord::new(item));
        let mut waits = Vec::with_capacity(inner.channels.len());

        for channel in &inner.channels {
            let (ack, rx) = oneshot::channel();
            let job = SinkJob {
                record: record.clone(),
                ack,
            };
            let queued = channel.tx.send(job).await.is_ok();
            waits.push(async move {
                if !queued {
                    return DeliveryState::Lost {
                        attempts: 0,
                        reason: "sink worker stopped".to_string(),
                    };
                }
                rx.await.unwrap_or_else(|_| DeliveryState::Lost {
                    attempts: 0,
                    reason: "sink worker dropped the item".to_string(),
                })
            });
        }

        let states = join_all(waits).await;
        let deliveries: Vec<SinkDelivery> = inner
            .channels
            .iter()
            .zip(states)
            .map(|(channel, state)| SinkDelivery {
                sink: channel.name.clone(),
                required: channel.required,
                state,
            })
            .collect();

        let any_ack = deliveries.iter().any(|d| d.state.is_acknowledged());
        let required_ok = deliveries
            .iter()
            .filter(|d| d.required)
            .all(|d| d.state.is_acknowledged());
        let delivered = any_ack && required_ok;

        // Best-effort losses matter only when nothing else delivered the item
        for delivery in deliveries.iter().filter(|d| d.required || !delivered) {
            if let DeliveryState::Lost { attempts, reason } = &delivery.state {
                inner.reporter.lost_delivery(LostDelivery {
                    source_id: record.source_id.clone(),
                    sequence: record.sequence,
                    sink: delivery.sink.clone(),
                    attempts: *attempts,
                    reason: reason.clone(),
                });
            }
        }

        if delivered {
            inner.metrics.record_item_forwarded();
            if inner.ledger.record(&record.source_id, record.sequence) {
                if let Err(e) = inner.ledger.persist().await {
                    warn!("Failed to persist delivery ledger: {}", e);
                }
            }
        } else {
            inner.metrics.record_item_lost();
        }

        ForwardOutcome {
            source_id: record.source_id.clone(),
            sequence: record.sequence,
            deliveries,
            delivered,
            replayed: false,
        }
    }

    /// Flush every sink
    pub async fn flush(&self) {
        for sink in &self.inner.sinks {
            if let Err(e) = sink.flush().await {
                warn!(sink = %sink.name(), "Failed to flush sink: {}", e);
            }
        }
    }
}

/// Worker loop for one sink: write each job with bounded retries
async fn run_sink(sink: Arc<dyn Sink>, mut rx: mpsc::Receiver<SinkJob>, config: ForwarderConfig) {
    while let Some(job) = rx.recv().await {
        let state = deliver(sink.as_ref(), &job.record, &config).await;
        // The forwarder may have stopped waiting; nothing to do then
        let _ = job.ack.send(state);
    }
    debug!(sink = %sink.name(), "Sink worker stopped");
}

async fn deliver(sink: &dyn Sink, record: &SinkRecord, config: &ForwarderConfig) -> DeliveryState {
    let mut state = DeliveryState::Pending;
    let mut attempt = 0;

    loop {
        attempt += 1;
        trace!(sink = %sink.name(), from = ?state, "sending");
        state = DeliveryState::Sent { attempt };

        let result = match tokio::time::timeout(config.attempt_timeout, sink.write(record)).await {
            Ok(result) => result,
            Err(_) => Err(Error::sink_unavailable(
                sink.name(),
                format!("no acknowledgment within {:?}", config.attempt_timeout),
            )),
        };

        match result {
            Ok(()) => return DeliveryState::Acknowledged { attempts: attempt },
            Err(e) => {
                trace!(sink = %sink.name(), from = ?state, "write failed");
                state = DeliveryState::Failed {
                    attempt,
                    reason: e.to_string(),
                };

                if !e.is_retryable() || !config.retry.allows_retry(attempt) {
                    warn!(
                        sink = %sink.name(),
                        source = %record.source_id,
                        sequence = %record.sequence,
                        attempts = attempt,
                        "Giving up on sink write: {}",
                        e
                    );
                    return DeliveryState::Lost {
                        attempts: attempt,
                        reason: e.to_string(),
                    };
                }

                debug!(sink = %sink.name(), attempt, ?state, "Retrying sink write: {}", e);
                tokio::time::sleep(config.retry.backoff(attempt)).await;
            }
        }
    }
}
