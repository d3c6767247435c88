//! Delivery ledger
//!
//! Tracks, per source, the highest sequence every required sink has
//! acknowledged. When a state file is configured the ledger is reloaded on
//! startup so already acknowledged content is neither re-read nor
//! re-forwarded. A crash between acknowledgment and persistence can still
//! replay items; sinks see `(source_id, sequence)` on every record and can
//! discard such duplicates.
//!
//! For file sources the ledger also remembers which file (device and inode)
//! the latest epoch was read from, so a file replaced while the process was
//! down is read from the start instead of from a stale offset.

use crate::source::FileIdentity;
use dlpstream_core::{Error, Result, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// The file an epoch of a file source was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMark {
    pub epoch: u32,
    pub identity: FileIdentity,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    acked: HashMap<String, Sequence>,
    #[serde(default)]
    files: HashMap<String, FileMark>,
}

/// Highest acknowledged sequence per source
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
    /// Held across snapshot, write and rename
    persisting: tokio::sync::Mutex<()>,
}

impl DeliveryLedger {
    /// In-memory ledger that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger from `path`, starting empty when the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state: LedgerState = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => LedgerState::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::config(format!("invalid state file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), sources = state.acked.len(), "Delivery ledger loaded");
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
            persisting: tokio::sync::Mutex::new(()),
        })
    }

    /// Highest acknowledged sequence for a source
    pub fn acked(&self, source_id: &str) -> Option<Sequence> {
        self.lock().acked.get(source_id).copied()
    }

    /// Whether `sequence` was already acknowledged for `source_id`
    pub fn is_delivered(&self, source_id: &str, sequence: Sequence) -> bool {
        self.acked(source_id).is_some_and(|acked| sequence <= acked)
    }

    /// Advance the record for a source; returns false if it was already at or past `sequence`
    pub fn record(&self, source_id: &str, sequence: Sequence) -> bool {
        let mut state = self.lock();
        match state.acked.get(source_id) {
            Some(current) if *current >= sequence => false,
            _ => {
                state.acked.insert(source_id.to_string(), sequence);
                true
            }
        }
    }

    /// File the newest known epoch of a file source was read from
    pub fn file_mark(&self, source_id: &str) -> Option<FileMark> {
        self.lock().files.get(source_id).copied()
    }

    /// Remember the file behind `mark.epoch`; older epochs never overwrite newer ones
    pub fn record_file(&self, source_id: &str, mark: FileMark) {
        let mut state = self.lock();
        match state.files.get(source_id) {
            Some(current) if current.epoch > mark.epoch || *current == mark => {}
            _ => {
                state.files.insert(source_id.to_string(), mark);
            }
        }
    }

    /// Write the ledger to its state file, if any
    ///
    /// Writes to a sibling temp file and renames it over the target so a
    /// crash never leaves a truncated ledger behind. Concurrent callers are
    /// serialized and each writes the snapshot current when its turn comes,
    /// so the file never moves backwards.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _turn = self.persisting.lock().await;
        let json = {
            let state = self.lock();
            serde_json::to_vec_pretty(&*state)?
        };

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Delivery ledger persisted");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
