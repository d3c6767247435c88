//! HTTP collector sink

use super::{Sink, SinkRecord};
use async_trait::async_trait;
use dlpstream_core::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Posts each record as JSON, e.g. to a log collector's HTTP input
///
/// Only a 2xx response counts as an acknowledgment.
pub struct HttpSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP sink client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &SinkRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| Error::sink_unavailable(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::sink_unavailable(
                &self.name,
                format!("collector answered {}", status),
            ));
        }

        debug!(sink = %self.name, source = %record.source_id, sequence = %record.sequence, "record acknowledged");
        Ok(())
    }
}
