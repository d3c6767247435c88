//! dlpstream Pipeline
//!
//! Streaming redaction from files and remote logs to logging sinks.
//!
//! ```text
//! Source Adapter -> RawItem -> Batch Dispatcher -> RedactionClient
//!                                     |
//!                               RedactedItem -> Sink Forwarder -> sinks
//! ```
//!
//! Each source has its own dispatcher lane, so items of one source reach the
//! sinks in sequence order while different sources progress independently.
//! Forwarding is at-least-once; the [`DeliveryLedger`] records what every
//! required sink acknowledged so restarts resume where delivery stopped.

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod forwarder;
pub mod ledger;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod source;

pub use batch::{Batch, BatchBuffer};
pub use config::{BatchConfig, IntakeConfig, PipelineConfig};
pub use dispatcher::{Admission, Backpressure, Dispatcher, DispatcherConfig, SourceHandle};
pub use forwarder::{
    DeliveryState, ForwardOutcome, ForwarderConfig, SinkDelivery, SinkForwarder, SinkWorkers,
};
pub use ledger::{DeliveryLedger, FileMark};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineReport, SourceFailure, SourceSpec};
pub use retry::RetryPolicy;
pub use sink::{ConfiguredSink, Sink, SinkConfig, SinkRecord};
pub use source::{
    FileIdentity, FileTailAdapter, HttpLogStore, LineTail, LogEntry, LogStore, MemoryLogStore, Payload,
    RemoteLogAdapter, SourceAdapter,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineReport, SourceSpec};
    pub use crate::sink::{ConfiguredSink, Sink, SinkConfig};
    pub use crate::source::{LogStore, SourceAdapter};
    pub use dlpstream_core::prelude::*;
}
