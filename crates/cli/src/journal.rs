//! Plain-text journal file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use turnloop_agent::Journal;
use turnloop_core::error::{Error, Result};

const ENTRY_PREFIX: &str = "Entry #";
const ENTRY_SEPARATOR: &str = "-------------------";

/// Appends numbered, timestamped entries to a text file. Numbering resumes
/// from the entries already in the file.
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn format_entry(entry_number: usize, timestamp: &str, summary: &str) -> String {
    format!("\n{ENTRY_PREFIX}{entry_number} - {timestamp}\n{summary}\n{ENTRY_SEPARATOR}\n")
}

#[async_trait]
impl Journal for FileJournal {
    async fn entry_count(&self) -> Result<usize> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| line.starts_with(ENTRY_PREFIX))
                .count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::Journal(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn append(&self, entry_number: usize, summary: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Journal(format!("failed to create {}: {e}", parent.display())))?;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let entry = format_entry(entry_number, &timestamp, summary);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Journal(format!("failed to open {}: {e}", self.path.display())))?;
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| Error::Journal(format!("failed to write {}: {e}", self.path.display())))?;
        Ok(())
    }
}
