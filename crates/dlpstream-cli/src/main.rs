//! dlpstream
//!
//! Scans files and remote logs for sensitive data, replaces every finding
//! with `REDACTED` and forwards the sanitized text to logging sinks.

use anyhow::{Context, Result};
use clap::Parser;
use dlpstream_pipeline::{HttpLogStore, Pipeline, PipelineBuilder, PipelineReport, SourceSpec};
use dlpstream_redaction::HttpRedactionClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cli;
mod config;

use cli::{Cli, Commands};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config = AppConfig::load(&cli.config, &cli)?;
    info!("Configuration loaded");

    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)?;
    }

    let pipeline = build_pipeline(&cli, config)
        .await
        .context("Failed to build pipeline")?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, draining...");
        trigger.cancel();
    });

    let reporter = pipeline.reporter().clone();
    let report = pipeline.run(shutdown).await?;
    summarize(&report);

    if let Some(path) = &cli.report_file {
        let lines = reporter.to_json_lines()?;
        std::fs::write(path, lines)
            .with_context(|| format!("Failed to write report file {}", path.display()))?;
        info!("Reports written to {}", path.display());
    }

    if !report.source_failures.is_empty() || !report.dropped_batches.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

async fn build_pipeline(cli: &Cli, config: AppConfig) -> Result<Pipeline> {
    let mut builder = PipelineBuilder::new()
        .config(config.pipeline)
        .detectors(cli.command.detectors().to_vec(), config.classifier.min_likelihood);

    if let Some(service) = &config.classifier.service {
        info!("Redaction service: {}", service.endpoint);
        builder = builder.client(Arc::new(HttpRedactionClient::new(service)?));
    } else {
        info!("Using built-in pattern redactor");
    }

    builder = match &cli.command {
        Commands::Files {
            files, no_follow, ..
        } => builder.sources(files.iter().map(|path| SourceSpec::File {
            path: path.clone(),
            follow: !no_follow,
        })),
        Commands::Logs { logs, .. } => {
            let store = config
                .log_store
                .as_ref()
                .context("`logs` needs a log store: set log_store.endpoint or --log-store")?;
            info!("Log store: {}", store.endpoint);
            builder
                .log_store(Arc::new(HttpLogStore::new(
                    &store.endpoint,
                    Duration::from_millis(store.timeout_ms),
                )?))
                .sources(logs.iter().cloned().map(SourceSpec::remote_log))
        }
    };

    Ok(builder.build().await?)
}

fn summarize(report: &PipelineReport) {
    let m = &report.metrics;
    info!(
        read = m.items_read,
        forwarded = m.items_forwarded,
        replayed = m.items_replayed,
        rejected = m.items_rejected,
        dropped = m.items_dropped,
        lost = m.items_lost,
        in_flight = m.in_flight(),
        avg_classifier_latency_us = m.avg_classifier_latency_us(),
        "Run complete"
    );

    for failure in &report.source_failures {
        error!(source = %failure.source_id, "Source failed: {}", failure.reason);
    }
    for leftover in &report.undelivered {
        warn!(
            source = %leftover.source_id,
            items = leftover.items,
            "Items accepted but not delivered before shutdown"
        );
    }
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Install the Prometheus recorder and serve it on `addr`
fn init_metrics(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "dlpstream_items_read_total",
        "Items accepted by the dispatcher, by source kind"
    );
    metrics::describe_counter!(
        "dlpstream_items_rejected_total",
        "Items discarded because an intake queue was full"
    );
    metrics::describe_counter!(
        "dlpstream_batches_total",
        "Batches by outcome (redacted or dropped)"
    );
    metrics::describe_counter!(
        "dlpstream_classifier_retries_total",
        "Retried classification attempts"
    );
    metrics::describe_histogram!(
        "dlpstream_classifier_latency_us",
        metrics::Unit::Microseconds,
        "Redaction client latency per batch in microseconds"
    );
    metrics::describe_counter!("dlpstream_items_forwarded_total", "Items delivered to sinks");
    metrics::describe_counter!("dlpstream_items_lost_total", "Items no sink configuration accepted");
    metrics::describe_counter!(
        "dlpstream_items_replayed_total",
        "Items skipped because they were already acknowledged"
    );

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("dlpstream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dlpstream=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
