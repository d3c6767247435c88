//! Append-only JSON lines file sink

use super::{Sink, SinkRecord};
use async_trait::async_trait;
use dlpstream_core::{Error, Result};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Writes one JSON object per line
pub struct FileSink {
    name: String,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) `path` for appending
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::config(format!("cannot open sink file {}: {}", path.display(), e)))?;

        Ok(Self {
            name: name.into(),
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &SinkRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| Error::sink_unavailable(&self.name, e))?;
        file.flush()
            .await
            .map_err(|e| Error::sink_unavailable(&self.name, e))?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlpstream_core::{RedactedItem, Sequence};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/redacted.jsonl");
        let sink = FileSink::open("local", &path).await.unwrap();

        for pos in [3u64, 9] {
            let item = RedactedItem {
                source_id: "app.log".into(),
                sequence: Sequence::at(pos),
                text: "Contact me at REDACTED".into(),
            };
            sink.write(&SinkRecord::new(item)).await.unwrap();
        }
        sink.flush().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<SinkRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].sequence, Sequence::at(9));
        assert_eq!(lines[0].message, "Contact me at REDACTED");
    }
}
