//! Redaction client trait

use async_trait::async_trait;
use dlpstream_core::{DetectorSet, Error, Result};

/// Capability that replaces sensitive spans in text
///
/// Implementations are stateless from the caller's point of view: every call
/// carries the full detector set and no session is kept between calls.
#[async_trait]
pub trait RedactionClient: Send + Sync {
    /// Redact a batch of texts in one call
    ///
    /// On success the returned vector has exactly one entry per input text,
    /// in input order.
    async fn redact_batch(&self, texts: &[String], detectors: &DetectorSet)
        -> Result<Vec<String>>;

    /// Redact a single text
    async fn redact(&self, text: &str, detectors: &DetectorSet) -> Result<String> {
        let mut out = self.redact_batch(&[text.to_string()], detectors).await?;
        match out.len() {
            1 => Ok(out.remove(0)),
            n => Err(Error::invalid_input(format!(
                "{} returned {} items for 1 input",
                self.name(),
                n
            ))),
        }
    }

    /// Get the client name
    fn name(&self) -> &str;
}
