//! dlpstream Redaction
//!
//! Clients for the classification/redaction capability used by the pipeline.
//!
//! - [`HttpRedactionClient`] talks to a remote DLP service over HTTP/JSON
//! - [`PatternRedactor`] runs a small catalog of regex detectors in-process,
//!   for offline runs and tests
//!
//! Both replace every finding with [`REDACTION_MARKER`] so output is
//! predictable regardless of which backend produced it.

pub mod client;
pub mod http;
pub mod pattern;

pub use client::RedactionClient;
pub use dlpstream_core::{DetectorSet, Likelihood, REDACTION_MARKER};
pub use http::{HttpRedactionClient, HttpRedactionConfig};
pub use pattern::{PatternDetector, PatternRedactor};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::RedactionClient;
    pub use crate::http::HttpRedactionClient;
    pub use crate::pattern::PatternRedactor;
    pub use dlpstream_core::{DetectorSet, Likelihood, REDACTION_MARKER};
}
