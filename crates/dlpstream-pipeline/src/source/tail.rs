//! "Next appended line or timeout" over a growing file
//!
//! Polls the file's length and identity on an interval. Growth is read from
//! the last complete line onwards; a shrinking file or a new inode at the
//! same path starts a new epoch from offset zero.

use dlpstream_core::{Error, Result, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// Upper bound on bytes read per poll
const MAX_READ_PER_POLL: u64 = 1024 * 1024;

/// Default cap on a held partial line
pub const DEFAULT_MAX_LINE_BYTES: usize = 512 * 1024;

/// One complete line and the sequence just past its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub text: String,
    pub sequence: Sequence,
}

/// Device and inode of a file; unknown on platforms without them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Tails one file for appended lines
#[derive(Debug)]
pub struct LineTail {
    path: PathBuf,
    source_id: String,
    epoch: u32,

    /// File offset where `partial` begins, i.e. just past the last complete line
    line_start: u64,

    /// Bytes read after `line_start` that do not yet end in a newline
    partial: Vec<u8>,

    /// A partial line this long is emitted without waiting for its newline
    max_line_bytes: usize,

    identity: Option<FileIdentity>,
    poll_interval: Duration,
    ready: VecDeque<TailLine>,
}

impl LineTail {
    /// Start tailing `path` at byte `offset` within `epoch`
    pub fn new(
        path: impl AsRef<Path>,
        source_id: impl Into<String>,
        start: Sequence,
        poll_interval: Duration,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            source_id: source_id.into(),
            epoch: start.epoch,
            line_start: start.position,
            partial: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            identity: None,
            poll_interval,
            ready: VecDeque::new(),
        }
    }

    /// Identity of the file `start` refers to, so a replacement before the
    /// first poll is noticed
    pub fn with_identity(mut self, identity: Option<FileIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Identity of the file currently tailed, once seen
    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// Cap on a line held while waiting for its terminator
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Position just past the last complete line handed out or buffered
    pub fn cursor(&self) -> Sequence {
        Sequence::new(self.epoch, self.line_start)
    }

    /// Wait up to `timeout` for the next complete line
    ///
    /// Returns `Ok(None)` when nothing arrived in time and an error when the
    /// file cannot be read; the tail stays usable after either.
    pub async fn next_line(&mut self, timeout: Duration) -> Result<Option<TailLine>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            self.poll().await?;
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Check the file once and queue any complete lines
    async fn poll(&mut self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| Error::source_unavailable(&self.source_id, e))?;
        let identity = FileIdentity::of(&meta);
        let len = meta.len();
        let read_offset = self.line_start + self.partial.len() as u64;

        let replaced = matches!((self.identity, identity), (Some(old), Some(new)) if old != new);
        if replaced || len < read_offset {
            self.start_epoch(if replaced { "rotated" } else { "truncated" });
        }
        self.identity = identity;

        let read_offset = self.line_start + self.partial.len() as u64;
        if len <= read_offset {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::source_unavailable(&self.source_id, e))?;
        file.seek(SeekFrom::Start(read_offset))
            .await
            .map_err(|e| Error::source_unavailable(&self.source_id, e))?;

        let want = (len - read_offset).min(MAX_READ_PER_POLL);
        let mut chunk = Vec::with_capacity(want as usize);
        file.take(want)
            .read_to_end(&mut chunk)
            .await
            .map_err(|e| Error::source_unavailable(&self.source_id, e))?;

        self.consume(&chunk);
        Ok(())
    }

    /// Split newly read bytes into complete lines
    fn consume(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);

        let mut consumed = 0usize;
        while let Some(pos) = self.partial[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + pos;
            let mut line = &self.partial[consumed..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            let next_start = end + 1;
            let sequence = Sequence::new(self.epoch, self.line_start + next_start as u64);
            self.ready.push_back(TailLine {
                text: String::from_utf8_lossy(line).into_owned(),
                sequence,
            });
            consumed = next_start;
        }

        while self.partial.len() - consumed >= self.max_line_bytes {
            let end = consumed + self.max_line_bytes;
            warn!(
                path = %self.path.display(),
                bytes = self.max_line_bytes,
                "line exceeds limit without a newline, emitting it split"
            );
            self.ready.push_back(TailLine {
                text: String::from_utf8_lossy(&self.partial[consumed..end]).into_owned(),
                sequence: Sequence::new(self.epoch, self.line_start + end as u64),
            });
            consumed = end;
        }

        if consumed > 0 {
            self.line_start += consumed as u64;
            self.partial.drain(..consumed);
        }
    }

    fn start_epoch(&mut self, why: &str) {
        self.epoch += 1;
        self.line_start = 0;
        self.partial.clear();
        self.ready.clear();
        info!(path = %self.path.display(), epoch = self.epoch, "file {}, restarting from offset 0", why);
        debug!(source = %self.source_id, "old epoch abandoned");
    }
}
