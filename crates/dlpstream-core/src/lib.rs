//! dlpstream Core
//!
//! Core types and utilities shared across dlpstream components.
//!
//! This crate provides:
//! - Source identities, sequences and the items that flow through the pipeline
//! - Detector sets and likelihood thresholds handed to the redaction service
//! - The error taxonomy used by every stage, with retry classification

pub mod detector;
pub mod error;
pub mod types;

pub use detector::{DetectorSet, Likelihood, REDACTION_MARKER};
pub use error::{ClassifierFailure, Error, Result};
pub use types::{RawItem, RedactedItem, Sequence, SequenceRange, Source, SourceKind};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::detector::{DetectorSet, Likelihood, REDACTION_MARKER};
    pub use crate::error::{Error, Result};
    pub use crate::types::{RawItem, RedactedItem, Sequence, Source, SourceKind};
}
