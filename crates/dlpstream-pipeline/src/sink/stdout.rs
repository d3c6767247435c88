//! Console sink

use super::{Sink, SinkRecord};
use async_trait::async_trait;
use dlpstream_core::Result;
use std::io::Write;

/// Prints each redacted message on its own line
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write(&self, record: &SinkRecord) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", record.message)?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        std::io::stdout().flush()?;
        Ok(())
    }
}
