//! Core types for dlpstream

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of content origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A local file, tailed for appended lines
    File,
    /// A named log in a remote log store
    RemoteLog,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::RemoteLog => "remote_log",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an item within its source
///
/// Ordered by epoch first, then position. File sources bump the epoch when
/// they detect truncation or rotation, so sequences never go backwards even
/// though the byte offset restarts at zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Sequence {
    pub epoch: u32,
    pub position: u64,
}

impl Sequence {
    /// Create a sequence in the given epoch
    pub fn new(epoch: u32, position: u64) -> Self {
        Self { epoch, position }
    }

    /// Sequence in epoch zero
    pub fn at(position: u64) -> Self {
        Self::new(0, position)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.position)
    }
}

/// Inclusive range of sequences covered by a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    pub first: Sequence,
    pub last: Sequence,
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

/// Where content originates, plus the last position handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Opaque identifier: a file path or a remote log name
    pub id: String,

    /// Kind of source
    pub kind: SourceKind,

    /// Last processed position
    pub cursor: Sequence,
}

impl Source {
    /// Create a file source starting at the beginning
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            id: path.into(),
            kind: SourceKind::File,
            cursor: Sequence::default(),
        }
    }

    /// Create a remote log source starting before the first entry
    pub fn remote_log(name: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            kind: SourceKind::RemoteLog,
            cursor: Sequence::default(),
        }
    }

    /// Resume from a previously recorded position
    pub fn with_cursor(mut self, cursor: Sequence) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One unit of content awaiting classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub source_id: String,
    pub sequence: Sequence,
    pub payload: String,

    /// Mime type guessed from the file name, for file-derived items
    pub mime_hint: Option<String>,
}

impl RawItem {
    /// Create a new raw item
    pub fn new(source_id: impl Into<String>, sequence: Sequence, payload: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            sequence,
            payload: payload.into(),
            mime_hint: None,
        }
    }

    /// Attach a mime hint
    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }
}

/// Result of successful classification of a raw item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedItem {
    pub source_id: String,
    pub sequence: Sequence,
    pub text: String,
}

impl RedactedItem {
    /// Create a redacted item carrying over the identity of `raw`
    pub fn from_raw(raw: &RawItem, text: impl Into<String>) -> Self {
        Self {
            source_id: raw.source_id.clone(),
            sequence: raw.sequence,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ordering_across_epochs() {
        let before_rotation = Sequence::new(0, 10_000);
        let after_rotation = Sequence::new(1, 12);
        assert!(after_rotation > before_rotation);
        assert!(Sequence::at(3) < Sequence::at(4));
    }

    #[test]
    fn test_redacted_item_keeps_identity() {
        let raw = RawItem::new("app.log", Sequence::at(42), "hello").with_mime_hint("text/plain");
        let redacted = RedactedItem::from_raw(&raw, "hello");
        assert_eq!(redacted.source_id, "app.log");
        assert_eq!(redacted.sequence, Sequence::at(42));
    }
}
