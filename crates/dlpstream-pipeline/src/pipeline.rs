//! Pipeline assembly and lifecycle
//!
//! [`PipelineBuilder`] validates everything up front; nothing is read,
//! classified or forwarded until [`PipelineBuilder::build`] has succeeded.
//! [`Pipeline::run`] wires adapters to dispatcher lanes and lanes to the sink
//! forwarder, then shuts down in dependency order once the sources finish or
//! the cancellation token fires.

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::forwarder::SinkForwarder;
use crate::ledger::DeliveryLedger;
use crate::sink::{build_sinks, ConfiguredSink};
use crate::source::{FileTailAdapter, LogStore, RemoteLogAdapter, SourceAdapter};
use dlpstream_core::{DetectorSet, Error, Likelihood, Result, Source};
use dlpstream_redaction::{PatternRedactor, RedactionClient};
use dlpstream_telemetry::{
    DroppedBatch, LostDelivery, MetricsCollector, MetricsSnapshot, Reporter, Undelivered,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A source to read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A local file; `follow` keeps tailing it after the initial read
    File { path: PathBuf, follow: bool },
    /// A log in the configured remote log store
    RemoteLog { name: String },
}

impl SourceSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            follow: true,
        }
    }

    pub fn remote_log(name: impl Into<String>) -> Self {
        Self::RemoteLog { name: name.into() }
    }

    /// Identifier the source is tracked under
    pub fn id(&self) -> String {
        match self {
            Self::File { path, .. } => path.to_string_lossy().into_owned(),
            Self::RemoteLog { name } => name.clone(),
        }
    }
}

/// A source that ended with an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub reason: String,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub metrics: MetricsSnapshot,

    /// Sources with their final cursors, for those that stopped cleanly
    pub sources: Vec<Source>,
    pub source_failures: Vec<SourceFailure>,
    pub dropped_batches: Vec<DroppedBatch>,
    pub lost_deliveries: Vec<LostDelivery>,
    pub undelivered: Vec<Undelivered>,
}

impl PipelineReport {
    /// Nothing was dropped, lost, left behind or failed
    pub fn is_clean(&self) -> bool {
        self.source_failures.is_empty()
            && self.dropped_batches.is_empty()
            && self.lost_deliveries.is_empty()
            && self.undelivered.is_empty()
    }
}

/// Builder for a [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    detectors: Vec<String>,
    min_likelihood: Likelihood,
    client: Option<Arc<dyn RedactionClient>>,
    sinks: Option<Vec<ConfiguredSink>>,
    sources: Vec<SourceSpec>,
    store: Option<Arc<dyn LogStore>>,
    metrics: MetricsCollector,
    reporter: Reporter,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            detectors: Vec::new(),
            min_likelihood: Likelihood::default(),
            client: None,
            sinks: None,
            sources: Vec::new(),
            store: None,
            metrics: MetricsCollector::new(),
            reporter: Reporter::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Detector identifiers and the minimum likelihood a finding needs
    pub fn detectors<I, S>(mut self, detectors: I, min_likelihood: Likelihood) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detectors = detectors.into_iter().map(Into::into).collect();
        self.min_likelihood = min_likelihood;
        self
    }

    /// Redaction backend; the local pattern redactor when unset
    pub fn client(mut self, client: Arc<dyn RedactionClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Sinks to use instead of the ones in the configuration
    pub fn sinks(mut self, sinks: Vec<ConfiguredSink>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn source(mut self, source: SourceSpec) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = SourceSpec>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Store that remote log sources are read from
    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the configuration and prepare sinks and the delivery ledger
    pub async fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let detectors = Arc::new(DetectorSet::new(self.detectors, self.min_likelihood)?);

        if self.sources.is_empty() {
            return Err(Error::config("at least one source is required"));
        }
        let mut seen = HashSet::new();
        for spec in &self.sources {
            if !seen.insert(spec.id()) {
                return Err(Error::config(format!("duplicate source: {}", spec.id())));
            }
            if matches!(spec, SourceSpec::RemoteLog { .. }) && self.store.is_none() {
                return Err(Error::config(format!(
                    "remote log {} needs a log store",
                    spec.id()
                )));
            }
        }

        let client: Arc<dyn RedactionClient> = match self.client {
            Some(client) => client,
            None => Arc::new(PatternRedactor::new()?),
        };

        let ledger = match &self.config.state_file {
            Some(path) => DeliveryLedger::load(path)?,
            None => DeliveryLedger::in_memory(),
        };

        let sinks = match self.sinks {
            Some(sinks) if !sinks.is_empty() => sinks,
            Some(_) => return Err(Error::config("at least one sink is required")),
            None => build_sinks(&self.config.sinks).await?,
        };

        info!(
            sources = self.sources.len(),
            detectors = detectors.len(),
            sinks = sinks.len(),
            client = client.name(),
            "Pipeline built"
        );

        Ok(Pipeline {
            config: self.config,
            detectors,
            client,
            sinks,
            sources: self.sources,
            store: self.store,
            ledger: Arc::new(ledger),
            metrics: self.metrics,
            reporter: self.reporter,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated pipeline, ready to run
pub struct Pipeline {
    config: PipelineConfig,
    detectors: Arc<DetectorSet>,
    client: Arc<dyn RedactionClient>,
    sinks: Vec<ConfiguredSink>,
    sources: Vec<SourceSpec>,
    store: Option<Arc<dyn LogStore>>,
    ledger: Arc<DeliveryLedger>,
    metrics: MetricsCollector,
    reporter: Reporter,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Run until every source finishes or `shutdown` fires, then drain
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineReport> {
        let adapters = self
            .sources
            .iter()
            .map(|spec| self.adapter(spec))
            .collect::<Result<Vec<_>>>()?;

        let Pipeline {
            config,
            detectors,
            client,
            sinks,
            ledger,
            metrics,
            reporter,
            ..
        } = self;

        let (forwarder, workers) = SinkForwarder::start(
            sinks,
            config.forwarder_config(),
            ledger.clone(),
            metrics.clone(),
            reporter.clone(),
        )?;

        let mut dispatcher = Dispatcher::new(
            config.dispatcher_config(),
            client,
            detectors,
            forwarder.clone(),
            metrics.clone(),
            reporter.clone(),
        );

        let mut tasks: Vec<(String, JoinHandle<Result<Source>>)> = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let source = adapter.source().clone();
            let handle = dispatcher.register(&source)?;
            info!(source = %source.id, kind = %source.kind, cursor = %source.cursor, "Starting source");
            tasks.push((source.id, tokio::spawn(adapter.run(handle, shutdown.child_token()))));
        }

        let mut sources = Vec::new();
        let mut source_failures = Vec::new();
        for (source_id, task) in tasks {
            let reason = match task.await {
                Ok(Ok(source)) => {
                    sources.push(source);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("adapter task failed: {}", e),
            };
            error!(source = %source_id, "Source failed: {}", reason);
            source_failures.push(SourceFailure { source_id, reason });
        }
        info!("Sources stopped, draining");

        let undelivered = dispatcher.drain(config.drain_timeout()).await;

        forwarder.flush().await;
        drop(forwarder);
        workers.join().await;

        if let Err(e) = ledger.persist().await {
            warn!("Failed to persist delivery ledger: {}", e);
        }

        let report = PipelineReport {
            metrics: metrics.snapshot(),
            sources,
            source_failures,
            dropped_batches: reporter.dropped_batches(),
            lost_deliveries: reporter.lost_deliveries(),
            undelivered,
        };
        info!(
            forwarded = report.metrics.items_forwarded,
            dropped = report.metrics.items_dropped,
            lost = report.metrics.items_lost,
            undelivered = report.undelivered.iter().map(|u| u.items).sum::<usize>(),
            "Pipeline stopped"
        );
        Ok(report)
    }

    fn adapter(&self, spec: &SourceSpec) -> Result<Box<dyn SourceAdapter>> {
        let resume = |source: Source| match self.ledger.acked(&source.id) {
            Some(cursor) => source.with_cursor(cursor),
            None => source,
        };

        match spec {
            SourceSpec::File { follow, .. } => {
                let source = resume(Source::file(spec.id()));
                Ok(Box::new(
                    FileTailAdapter::new(source, self.config.tail_poll())
                        .follow(*follow)
                        .with_ledger(self.ledger.clone())
                        .with_max_line_bytes(self.config.batch.max_bytes),
                ))
            }
            SourceSpec::RemoteLog { name } => {
                let store = self
                    .store
                    .clone()
                    .ok_or_else(|| Error::config(format!("remote log {} needs a log store", name)))?;
                let source = resume(Source::remote_log(name.clone()));
                Ok(Box::new(RemoteLogAdapter::new(
                    source,
                    store,
                    self.config.remote_poll(),
                )))
            }
        }
    }
}
