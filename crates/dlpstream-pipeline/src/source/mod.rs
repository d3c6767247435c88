//! Source adapters
//!
//! An adapter owns one [`Source`] and its cursor. It discovers new content,
//! hands each item to its dispatcher lane and advances the cursor only after
//! the lane has taken the item.

mod file;
mod remote;
mod store;
mod tail;

pub use file::FileTailAdapter;
pub use remote::RemoteLogAdapter;
pub use store::{HttpLogStore, LogEntry, LogStore, MemoryLogStore, Payload};
pub use tail::{FileIdentity, LineTail, TailLine, DEFAULT_MAX_LINE_BYTES};

use crate::dispatcher::{Admission, SourceHandle};
use async_trait::async_trait;
use dlpstream_core::{RawItem, Result, Source};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Produces raw items for one configured source
#[async_trait]
pub trait SourceAdapter: Send {
    /// The source this adapter reads
    fn source(&self) -> &Source;

    /// Run until the source is exhausted or `shutdown` fires
    ///
    /// Returns the source with its final cursor. Errors are reserved for
    /// failures that end this source only; they never stop the pipeline.
    async fn run(self: Box<Self>, intake: SourceHandle, shutdown: CancellationToken) -> Result<Source>;
}

/// Submit unless shutdown fires first; `None` means shutdown
async fn submit_or_cancel(
    intake: &SourceHandle,
    item: RawItem,
    shutdown: &CancellationToken,
) -> Option<Result<Admission>> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        admitted = intake.submit(item) => Some(admitted),
    }
}

/// Sleep unless shutdown fires first; `false` means shutdown
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
