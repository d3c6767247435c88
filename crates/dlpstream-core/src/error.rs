//! Error types for dlpstream

/// Result type alias using dlpstream's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a classification call failed transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierFailure {
    /// The service could not be reached or answered with a server error
    Unavailable,
    /// The caller exhausted its quota
    QuotaExceeded,
    /// No response within the request timeout
    Timeout,
}

impl std::fmt::Display for ClassifierFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unavailable => "service unavailable",
            Self::QuotaExceeded => "quota exceeded",
            Self::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Core error type for dlpstream operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file or remote log could not be read
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// The redaction service failed in a way that may succeed on retry
    #[error("classifier {kind}: {message}")]
    ClassifierTransient {
        kind: ClassifierFailure,
        message: String,
    },

    /// The redaction service rejected the request; retrying cannot help
    #[error("classifier rejected input: {0}")]
    ClassifierInvalidInput(String),

    /// A sink did not acknowledge a write
    #[error("sink {sink} unavailable: {reason}")]
    SinkUnavailable { sink: String, reason: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem and network IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new source-unavailable error
    pub fn source_unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new transient classifier error
    pub fn classifier_transient(kind: ClassifierFailure, msg: impl Into<String>) -> Self {
        Self::ClassifierTransient {
            kind,
            message: msg.into(),
        }
    }

    /// Create a new invalid-input classifier error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::ClassifierInvalidInput(msg.into())
    }

    /// Create a new sink-unavailable error
    pub fn sink_unavailable(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::SinkUnavailable {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failed operation is worth attempting again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. }
            | Self::ClassifierTransient { .. }
            | Self::SinkUnavailable { .. }
            | Self::Io(_) => true,
            Self::ClassifierInvalidInput(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Internal(_) => false,
        }
    }

    /// Short label used for metrics and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::ClassifierTransient { .. } => "classifier_transient",
            Self::ClassifierInvalidInput(_) => "classifier_invalid_input",
            Self::SinkUnavailable { .. } => "sink_unavailable",
            Self::Config(_) => "configuration",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}
