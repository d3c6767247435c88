//! File tail adapter

use super::tail::{FileIdentity, LineTail, DEFAULT_MAX_LINE_BYTES};
use super::{sleep_or_cancel, submit_or_cancel, SourceAdapter};
use crate::dispatcher::SourceHandle;
use crate::ledger::{DeliveryLedger, FileMark};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use dlpstream_core::{Error, RawItem, Result, Sequence, Source};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Emits a file's existing content once, then each appended line
pub struct FileTailAdapter {
    source: Source,
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    retry: RetryPolicy,
    mime_hint: Option<String>,
    max_line_bytes: usize,
    ledger: Option<Arc<DeliveryLedger>>,
}

/// Where to resume reading a file
///
/// `mark` is the file the newest known epoch was read from. A different file
/// at the path, or one shorter than the cursor, is read from offset 0 in a
/// fresh epoch; a mark newer than the cursor means nothing of that epoch was
/// acknowledged yet.
fn resume_point(
    cursor: Sequence,
    mark: Option<FileMark>,
    identity: Option<FileIdentity>,
    len: u64,
) -> Sequence {
    let newest_epoch = mark.map_or(cursor.epoch, |m| m.epoch.max(cursor.epoch));
    match (mark, identity) {
        (Some(mark), Some(current)) if mark.identity != current => {
            Sequence::new(newest_epoch + 1, 0)
        }
        (Some(mark), Some(_)) if mark.epoch > cursor.epoch => Sequence::new(mark.epoch, 0),
        _ if cursor.position <= len => cursor,
        _ => Sequence::new(newest_epoch + 1, 0),
    }
}

impl FileTailAdapter {
    /// Adapter for `source`, whose id is the file path
    pub fn new(source: Source, poll_interval: Duration) -> Self {
        let path = PathBuf::from(&source.id);
        let mime_hint = mime_guess::from_path(&path)
            .first()
            .map(|m| m.essence_str().to_string());

        Self {
            source,
            path,
            follow: true,
            poll_interval,
            retry: RetryPolicy::source(),
            mime_hint,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            ledger: None,
        }
    }

    /// Ledger to check and update which file the cursor belongs to
    pub fn with_ledger(mut self, ledger: Arc<DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Cap on an appended line held while its newline is missing
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    fn mark_file(&self, epoch: u32, identity: Option<FileIdentity>) {
        if let (Some(ledger), Some(identity)) = (&self.ledger, identity) {
            ledger.record_file(&self.source.id, FileMark { epoch, identity });
        }
    }

    /// Keep watching for appended lines after the initial read
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn item(&self, sequence: Sequence, payload: String) -> RawItem {
        let item = RawItem::new(self.source.id.clone(), sequence, payload);
        match &self.mime_hint {
            Some(mime) => item.with_mime_hint(mime.clone()),
            None => item,
        }
    }

    /// Read everything after the cursor
    ///
    /// Returns the payload, the sequence at end of file and the file's
    /// identity. A file replaced or truncated while we were away is read
    /// from the start in the next epoch.
    async fn read_existing(&self) -> Result<(String, Sequence, Option<FileIdentity>)> {
        let unavailable = |e: std::io::Error| Error::source_unavailable(&self.source.id, e);

        let mut file = tokio::fs::File::open(&self.path).await.map_err(unavailable)?;
        let meta = file.metadata().await.map_err(unavailable)?;
        let len = meta.len();
        let identity = FileIdentity::of(&meta);

        let cursor = self.source.cursor;
        let mark = self.ledger.as_ref().and_then(|l| l.file_mark(&self.source.id));
        let start = resume_point(cursor, mark, identity, len);
        if start.epoch != cursor.epoch {
            info!(
                path = %self.path.display(),
                recorded = %cursor,
                len,
                "file replaced or truncated since last run, starting over"
            );
        }
        self.mark_file(start.epoch, identity);

        file.seek(SeekFrom::Start(start.position))
            .await
            .map_err(unavailable)?;
        let mut bytes = Vec::with_capacity((len - start.position) as usize);
        file.take(len - start.position)
            .read_to_end(&mut bytes)
            .await
            .map_err(unavailable)?;

        let end = Sequence::new(start.epoch, start.position + bytes.len() as u64);
        Ok((String::from_utf8_lossy(&bytes).into_owned(), end, identity))
    }
}

#[async_trait]
impl SourceAdapter for FileTailAdapter {
    fn source(&self) -> &Source {
        &self.source
    }

    async fn run(mut self: Box<Self>, intake: SourceHandle, shutdown: CancellationToken) -> Result<Source> {
        let mut failures = 0u32;

        let (existing, end, identity) = loop {
            match self.read_existing().await {
                Ok(read) => break read,
                Err(e) if !self.follow => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.backoff(failures);
                    warn!(path = %self.path.display(), ?delay, "Source unavailable: {}", e);
                    if !sleep_or_cancel(delay, &shutdown).await {
                        return Ok(self.source);
                    }
                }
            }
        };

        if existing.is_empty() {
            debug!(path = %self.path.display(), "no existing content");
        } else {
            let item = self.item(end, existing);
            match submit_or_cancel(&intake, item, &shutdown).await {
                None => return Ok(self.source),
                Some(admitted) => {
                    admitted?;
                }
            }
        }
        self.source.cursor = end;

        if !self.follow {
            info!(path = %self.path.display(), "file read, not following");
            return Ok(self.source);
        }

        let mut tail = LineTail::new(&self.path, self.source.id.clone(), end, self.poll_interval)
            .with_identity(identity)
            .with_max_line_bytes(self.max_line_bytes);
        failures = 0;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = tail.next_line(self.poll_interval) => next,
            };

            match next {
                Ok(Some(line)) => {
                    failures = 0;
                    self.mark_file(line.sequence.epoch, tail.identity());
                    let item = self.item(line.sequence, line.text);
                    match submit_or_cancel(&intake, item, &shutdown).await {
                        None => break,
                        Some(Ok(_)) => {
                            self.source.cursor = line.sequence;
                        }
                        Some(Err(e)) => return Err(e),
                    }
                }
                Ok(None) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.backoff(failures);
                    warn!(path = %self.path.display(), ?delay, "Source unavailable: {}", e);
                    if !sleep_or_cancel(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }

        debug!(path = %self.path.display(), cursor = %self.source.cursor, "file adapter stopped");
        Ok(self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(epoch: u32, ino: u64) -> FileMark {
        FileMark {
            epoch,
            identity: FileIdentity { dev: 1, ino },
        }
    }

    fn id(ino: u64) -> Option<FileIdentity> {
        Some(FileIdentity { dev: 1, ino })
    }

    #[test]
    fn test_same_file_resumes_at_cursor() {
        let cursor = Sequence::new(2, 40);
        assert_eq!(resume_point(cursor, Some(mark(2, 7)), id(7), 100), cursor);
        assert_eq!(resume_point(cursor, None, id(7), 100), cursor);
    }

    #[test]
    fn test_replaced_file_starts_next_epoch_even_when_long_enough() {
        let cursor = Sequence::new(2, 40);
        assert_eq!(
            resume_point(cursor, Some(mark(2, 7)), id(8), 100),
            Sequence::new(3, 0)
        );
    }

    #[test]
    fn test_shorter_file_starts_next_epoch() {
        let cursor = Sequence::new(0, 40);
        assert_eq!(resume_point(cursor, None, id(7), 10), Sequence::new(1, 0));
    }

    #[test]
    fn test_unacknowledged_newer_epoch_is_read_from_start() {
        // rotated to inode 8 in epoch 3, nothing of it acknowledged yet
        let cursor = Sequence::new(2, 40);
        assert_eq!(
            resume_point(cursor, Some(mark(3, 8)), id(8), 100),
            Sequence::new(3, 0)
        );
        assert_eq!(
            resume_point(cursor, Some(mark(3, 8)), id(9), 100),
            Sequence::new(4, 0)
        );
    }
}
