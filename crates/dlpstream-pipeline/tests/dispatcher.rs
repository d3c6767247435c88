//! Batch dispatcher behavior: batching, retry policy, ordering, backpressure and drain

mod common;

use common::*;
use dlpstream_core::{Error, RawItem, Sequence, SequenceRange, Source};
use dlpstream_pipeline::{Admission, Backpressure, Dispatcher, DispatcherConfig, RetryPolicy};
use dlpstream_telemetry::{MetricsCollector, Reporter};
use std::sync::Arc;
use std::time::Duration;

fn config(max_batch_items: usize) -> DispatcherConfig {
    DispatcherConfig {
        max_batch_items,
        flush_interval: Duration::from_millis(50),
        ..DispatcherConfig::default()
    }
}

fn item(source: &str, position: u64, text: &str) -> RawItem {
    RawItem::new(source, Sequence::at(position), text)
}

#[tokio::test(start_paused = true)]
async fn test_invalid_batch_is_dropped_once_and_never_forwarded() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(ScriptedClient::new().always_fail(|| Error::invalid_input("bad text")));

    let mut dispatcher = Dispatcher::new(
        config(3),
        client.clone(),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();
    for (pos, text) in [(1, "a@b.com"), (2, "c@d.com"), (3, "e@f.com")] {
        handle.submit(item("audit", pos, text)).await.unwrap();
    }
    drop(handle);

    let undelivered = dispatcher.drain(Duration::from_secs(5)).await;
    drop(forwarder);
    workers.join().await;

    assert!(undelivered.is_empty());
    assert_eq!(client.calls(), 1, "invalid input is not retried");
    assert_eq!(sink.attempts(), 0);

    let dropped = reporter.dropped_batches();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].source_id, "audit");
    assert_eq!(dropped[0].items, 3);
    assert_eq!(dropped[0].attempts, 1);
    assert_eq!(
        dropped[0].range,
        SequenceRange {
            first: Sequence::at(1),
            last: Sequence::at(3)
        }
    );

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.batches_dropped, 1);
    assert_eq!(snapshot.items_dropped, 3);
    assert_eq!(snapshot.items_forwarded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_then_forwarded() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(
        ScriptedClient::new()
            .then(Step::Fail(unavailable()))
            .then(Step::Fail(unavailable())),
    );

    let mut dispatcher = Dispatcher::new(
        config(10),
        client.clone(),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();
    handle
        .submit(item("audit", 1, "Contact me at a@b.com"))
        .await
        .unwrap();
    drop(handle);

    dispatcher.drain(Duration::from_secs(30)).await;
    drop(forwarder);
    workers.join().await;

    assert_eq!(client.calls(), 3);
    assert_eq!(sink.messages(), vec!["Contact me at REDACTED"]);
    assert!(reporter.dropped_batches().is_empty());
    assert_eq!(metrics.snapshot().classifier_retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_drops_batch() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(ScriptedClient::new().always_fail(unavailable));

    let mut dispatcher = Dispatcher::new(
        config(10),
        client.clone(),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();
    handle.submit(item("audit", 7, "x")).await.unwrap();
    drop(handle);

    dispatcher.drain(Duration::from_secs(60)).await;
    drop(forwarder);
    workers.join().await;

    assert_eq!(client.calls(), RetryPolicy::classifier().max_attempts as usize);
    assert!(sink.records().is_empty());
    let dropped = reporter.dropped_batches();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].attempts, 4);
    assert!(dropped[0].reason.contains("service unavailable"));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_cardinality_drops_batch() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(ScriptedClient::new().then(Step::WrongCount(1)));

    let mut dispatcher = Dispatcher::new(
        config(2),
        client.clone(),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();
    handle.submit(item("audit", 1, "one")).await.unwrap();
    handle.submit(item("audit", 2, "two")).await.unwrap();
    handle.submit(item("audit", 3, "three")).await.unwrap();
    drop(handle);

    dispatcher.drain(Duration::from_secs(5)).await;
    drop(forwarder);
    workers.join().await;

    // First batch dropped, the lane carries on with the next one
    assert_eq!(reporter.dropped_batches().len(), 1);
    assert_eq!(reporter.dropped_batches()[0].items, 2);
    assert_eq!(sink.messages(), vec!["three"]);
}

#[tokio::test]
async fn test_per_source_order_is_preserved() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(ScriptedClient::new());

    let mut dispatcher = Dispatcher::new(
        config(7),
        client.clone(),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let first = dispatcher.register(&Source::file("a.log")).unwrap();
    let second = dispatcher.register(&Source::remote_log("b")).unwrap();

    let feed_a = tokio::spawn(async move {
        for pos in 1..=100u64 {
            first.submit(item("a.log", pos, &format!("a{}", pos))).await.unwrap();
        }
    });
    let feed_b = tokio::spawn(async move {
        for pos in 1..=100u64 {
            second.submit(item("b", pos, &format!("b{}", pos))).await.unwrap();
        }
    });
    feed_a.await.unwrap();
    feed_b.await.unwrap();

    dispatcher.drain(Duration::from_secs(5)).await;
    drop(forwarder);
    workers.join().await;

    let records = sink.records();
    assert_eq!(records.len(), 200);
    for source in ["a.log", "b"] {
        let positions: Vec<u64> = records
            .iter()
            .filter(|r| r.source_id == source)
            .map(|r| r.sequence.position)
            .collect();
        assert_eq!(positions, (1..=100).collect::<Vec<_>>(), "order for {}", source);
    }
    assert!(client.batch_sizes().iter().all(|n| *n <= 7));
}

#[tokio::test(flavor = "current_thread")]
async fn test_drop_backpressure_rejects_when_full() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);

    let mut dispatcher = Dispatcher::new(
        DispatcherConfig {
            intake_capacity: 2,
            backpressure: Backpressure::Drop,
            ..config(50)
        },
        Arc::new(ScriptedClient::new()),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();

    // No yield between submissions, so the assembler cannot make room
    let mut admissions = Vec::new();
    for pos in 1..=5 {
        admissions.push(handle.submit(item("audit", pos, "x")).await.unwrap());
    }
    drop(handle);

    dispatcher.drain(Duration::from_secs(5)).await;
    drop(forwarder);
    workers.join().await;

    assert_eq!(
        admissions,
        vec![
            Admission::Accepted,
            Admission::Accepted,
            Admission::Rejected,
            Admission::Rejected,
            Admission::Rejected
        ]
    );
    assert_eq!(metrics.snapshot().items_rejected, 3);
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_reports_undelivered_items() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);
    let client = Arc::new(ScriptedClient::new().then(Step::Hang));

    let mut dispatcher = Dispatcher::new(
        config(10),
        client,
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();
    for pos in [4, 5, 6] {
        handle.submit(item("audit", pos, "stuck")).await.unwrap();
    }
    drop(handle);

    let undelivered = dispatcher.drain(Duration::from_secs(10)).await;
    drop(forwarder);
    workers.join().await;

    assert_eq!(undelivered.len(), 1);
    assert_eq!(undelivered[0].source_id, "audit");
    assert_eq!(undelivered[0].items, 3);
    assert_eq!(
        undelivered[0].range,
        Some(SequenceRange {
            first: Sequence::at(4),
            last: Sequence::at(6)
        })
    );
    assert!(sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_blocking_submit_is_not_reported_undelivered() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (_sink, configured) = memory_sink("collector");
    let (forwarder, workers) = forwarder(vec![configured], &metrics, &reporter);

    let mut dispatcher = Dispatcher::new(
        DispatcherConfig {
            intake_capacity: 1,
            ..config(1)
        },
        Arc::new(ScriptedClient::new().then(Step::Hang)),
        email_detectors(),
        forwarder.clone(),
        metrics.clone(),
        reporter.clone(),
    );
    let handle = dispatcher.register(&Source::remote_log("audit")).unwrap();

    // The lane stalls on the first batch, so later submits block and get cancelled
    let mut accepted = Vec::new();
    for pos in 1..=10 {
        let submit = handle.submit(item("audit", pos, "stuck"));
        if let Ok(admission) = tokio::time::timeout(Duration::from_millis(100), submit).await {
            assert_eq!(admission.unwrap(), Admission::Accepted);
            accepted.push(pos);
        }
    }
    drop(handle);
    assert!(!accepted.is_empty());
    assert!(accepted.len() < 10);

    let undelivered = dispatcher.drain(Duration::from_secs(1)).await;
    drop(forwarder);
    workers.join().await;

    assert_eq!(undelivered.len(), 1);
    assert_eq!(undelivered[0].items, accepted.len());
    assert_eq!(
        undelivered[0].range,
        Some(SequenceRange {
            first: Sequence::at(accepted[0]),
            last: Sequence::at(*accepted.last().unwrap())
        })
    );
}

#[tokio::test]
async fn test_duplicate_registration_is_config_error() {
    let metrics = MetricsCollector::new();
    let reporter = Reporter::new();
    let (_sink, configured) = memory_sink("collector");
    let (forwarder, _workers) = forwarder(vec![configured], &metrics, &reporter);

    let mut dispatcher = Dispatcher::new(
        config(10),
        Arc::new(ScriptedClient::new()),
        email_detectors(),
        forwarder,
        metrics,
        reporter,
    );
    let _handle = dispatcher.register(&Source::file("app.log")).unwrap();
    assert!(matches!(
        dispatcher.register(&Source::file("app.log")),
        Err(Error::Config(_))
    ));
}
