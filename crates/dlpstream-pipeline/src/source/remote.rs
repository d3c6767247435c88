//! Remote log adapter

use super::store::LogStore;
use super::{sleep_or_cancel, submit_or_cancel, SourceAdapter};
use crate::dispatcher::SourceHandle;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use dlpstream_core::{RawItem, Result, Sequence, Source};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polls one log of a [`LogStore`] for entries past its cursor
pub struct RemoteLogAdapter {
    source: Source,
    store: Arc<dyn LogStore>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl RemoteLogAdapter {
    /// Adapter for `source`, whose id is the log name
    pub fn new(source: Source, store: Arc<dyn LogStore>, poll_interval: Duration) -> Self {
        Self {
            source,
            store,
            poll_interval,
            retry: RetryPolicy::source(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl SourceAdapter for RemoteLogAdapter {
    fn source(&self) -> &Source {
        &self.source
    }

    async fn run(mut self: Box<Self>, intake: SourceHandle, shutdown: CancellationToken) -> Result<Source> {
        let mut failures = 0u32;

        loop {
            let after = self.source.cursor.position;
            let delay = match self.store.list_entries(&self.source.id, after).await {
                Ok(mut entries) => {
                    failures = 0;
                    entries.retain(|e| e.position > after);
                    entries.sort_by_key(|e| e.position);
                    entries.dedup_by_key(|e| e.position);
                    debug!(log = %self.source.id, after, fresh = entries.len(), "log polled");

                    for entry in entries {
                        let payload = match entry.payload.render() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(log = %self.source.id, position = entry.position, "Skipping unrenderable entry: {}", e);
                                continue;
                            }
                        };

                        let sequence = Sequence::at(entry.position);
                        let item = RawItem::new(self.source.id.clone(), sequence, payload);
                        match submit_or_cancel(&intake, item, &shutdown).await {
                            None => return Ok(self.source),
                            Some(admitted) => {
                                admitted?;
                                self.source.cursor = sequence;
                            }
                        }
                    }
                    self.poll_interval
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.poll_interval.max(self.retry.backoff(failures));
                    warn!(log = %self.source.id, ?delay, "Source unavailable: {}", e);
                    delay
                }
            };

            if !sleep_or_cancel(delay, &shutdown).await {
                break;
            }
        }

        debug!(log = %self.source.id, cursor = %self.source.cursor, "remote log adapter stopped");
        Ok(self.source)
    }
}
