//! Logging sinks for redacted output

mod file;
mod http;
mod memory;
mod stdout;

pub use file::FileSink;
pub use http::HttpSink;
pub use memory::MemorySink;
pub use stdout::StdoutSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlpstream_core::{RedactedItem, Result, Sequence};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// What a sink receives for each redacted item
///
/// `(source_id, sequence)` identifies the item, so a sink that sees the same
/// pair twice is looking at an at-least-once replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub source_id: String,
    pub sequence: Sequence,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SinkRecord {
    pub fn new(item: RedactedItem) -> Self {
        Self {
            source_id: item.source_id,
            sequence: item.sequence,
            message: item.text,
            timestamp: Utc::now(),
        }
    }

    /// Deduplication key
    pub fn key(&self) -> (&str, Sequence) {
        (&self.source_id, self.sequence)
    }
}

/// Trait for log output destinations
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Write one record; `Ok` means the sink acknowledged it
    async fn write(&self, record: &SinkRecord) -> Result<()>;

    /// Flush any buffered data
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A sink plus whether its acknowledgment is mandatory
#[derive(Clone)]
pub struct ConfiguredSink {
    pub sink: Arc<dyn Sink>,
    pub required: bool,
}

impl ConfiguredSink {
    /// Durable sink whose acknowledgment is required
    pub fn required(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            required: true,
        }
    }

    /// Best-effort sink
    pub fn fallback(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            required: false,
        }
    }
}

/// Sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// POST each record as JSON to a collector endpoint
    Http {
        #[serde(default)]
        name: Option<String>,
        url: String,
        #[serde(default = "default_true")]
        required: bool,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
    /// Append JSON lines to a local file
    File {
        #[serde(default)]
        name: Option<String>,
        path: PathBuf,
        #[serde(default)]
        required: bool,
    },
    /// Print messages to stdout
    Stdout {
        #[serde(default)]
        required: bool,
    },
}

/// Create sinks from configuration
pub async fn build_sinks(configs: &[SinkConfig]) -> Result<Vec<ConfiguredSink>> {
    let mut sinks = Vec::with_capacity(configs.len());

    for config in configs {
        let configured = match config {
            SinkConfig::Http {
                name,
                url,
                required,
                timeout_ms,
            } => {
                let name = name.clone().unwrap_or_else(|| "http".to_string());
                let sink = HttpSink::new(name, url.clone(), *timeout_ms)?;
                ConfiguredSink {
                    sink: Arc::new(sink),
                    required: *required,
                }
            }
            SinkConfig::File {
                name,
                path,
                required,
            } => {
                let name = name
                    .clone()
                    .unwrap_or_else(|| format!("file:{}", path.display()));
                let sink = FileSink::open(name, path).await?;
                ConfiguredSink {
                    sink: Arc::new(sink),
                    required: *required,
                }
            }
            SinkConfig::Stdout { required } => ConfiguredSink {
                sink: Arc::new(StdoutSink::new()),
                required: *required,
            },
        };
        sinks.push(configured);
    }

    // Ensure at least stdout if no sinks configured
    if sinks.is_empty() {
        sinks.push(ConfiguredSink::fallback(Arc::new(StdoutSink::new())));
    }

    Ok(sinks)
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    5_000
}
