//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dlpstream_core::{ClassifierFailure, DetectorSet, Error, Likelihood, Result};
use dlpstream_pipeline::sink::MemorySink;
use dlpstream_pipeline::{
    ConfiguredSink, DeliveryLedger, ForwarderConfig, RetryPolicy, SinkForwarder, SinkWorkers,
};
use dlpstream_redaction::{PatternRedactor, RedactionClient};
use dlpstream_telemetry::{MetricsCollector, Reporter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted client does on one call
pub enum Step {
    Fail(Error),
    /// Return this many items regardless of input size
    WrongCount(usize),
    Hang,
}

/// Pattern redactor with scripted failures in front of it
pub struct ScriptedClient {
    inner: PatternRedactor,
    script: Mutex<VecDeque<Step>>,
    always: Mutex<Option<fn() -> Error>>,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            inner: PatternRedactor::new().unwrap(),
            script: Mutex::new(VecDeque::new()),
            always: Mutex::new(None),
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    /// Fail every call not covered by the script
    pub fn always_fail(self, err: fn() -> Error) -> Self {
        *self.always.lock().unwrap() = Some(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedactionClient for ScriptedClient {
    async fn redact_batch(&self, texts: &[String], detectors: &DetectorSet) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(e)) => return Err(e),
            Some(Step::WrongCount(n)) => return Ok(vec!["x".to_string(); n]),
            Some(Step::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        let always = *self.always.lock().unwrap();
        if let Some(err) = always {
            return Err(err());
        }
        self.inner.redact_batch(texts, detectors).await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn unavailable() -> Error {
    Error::classifier_transient(ClassifierFailure::Unavailable, "503 from upstream")
}

pub fn email_detectors() -> Arc<DetectorSet> {
    Arc::new(DetectorSet::new(["EMAIL_ADDRESS"], Likelihood::Unspecified).unwrap())
}

/// Forwarder over the given sinks with fast retries
pub fn forwarder(
    sinks: Vec<ConfiguredSink>,
    metrics: &MetricsCollector,
    reporter: &Reporter,
) -> (SinkForwarder, SinkWorkers) {
    let config = ForwarderConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        },
        attempt_timeout: Duration::from_secs(1),
    };
    SinkForwarder::start(
        sinks,
        config,
        Arc::new(DeliveryLedger::in_memory()),
        metrics.clone(),
        reporter.clone(),
    )
    .unwrap()
}

pub fn memory_sink(name: &str) -> (Arc<MemorySink>, ConfiguredSink) {
    let sink = Arc::new(MemorySink::new(name));
    (sink.clone(), ConfiguredSink::required(sink))
}

/// Poll `cond` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
