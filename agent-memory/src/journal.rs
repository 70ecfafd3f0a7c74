//! Durable JSONL journal of chat exchanges and tool executions.

use std::path::{Path, PathBuf};

use agent_primitives::{OwnerId, RecordId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::MemoryResult;
use crate::history::{ChatHistory, ExecutionSink};
use crate::record::{ChatRecord, ExecutionRecord, ExecutionStats};

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A question/answer exchange.
    Chat(ChatRecord),
    /// A tool execution.
    Execution(ExecutionRecord),
}

/// File-backed journal writing newline-delimited JSON entries.
///
/// Reads scan the whole file; lines that fail to decode are skipped with a
/// warning.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FileJournal {
    /// Opens (or creates) a journal file at the provided path.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while preparing the file.
    pub async fn open(path: impl Into<PathBuf>) -> MemoryResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the underlying path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Propagates serialization and I/O errors.
    pub async fn append(&self, entry: &JournalEntry) -> MemoryResult<()> {
        let line = serde_json::to_vec(entry)?;
        let mut guard = self.file.lock().await;
        guard.write_all(&line).await?;
        guard.write_u8(b'\n').await?;
        guard.flush().await?;
        Ok(())
    }

    /// Reads every decodable entry, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub async fn entries(&self) -> MemoryResult<Vec<JournalEntry>> {
        let _guard = self.file.lock().await;
        let data = fs::read(&self.path).await?;
        let mut entries = Vec::new();
        for (line, chunk) in data
            .split(|byte| *byte == b'\n')
            .enumerate()
            .filter(|(_, chunk)| !chunk.is_empty())
        {
            match serde_json::from_slice(chunk) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(path = %self.path.display(), line = line + 1, %err, "skipping corrupt journal line"),
            }
        }
        Ok(entries)
    }

    /// Truncates the journal.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub async fn clear(&self) -> MemoryResult<()> {
        let mut guard = self.file.lock().await;
        guard.rewind().await?;
        guard.set_len(0).await?;
        guard.flush().await?;
        Ok(())
    }

    async fn executions_of(&self, owner: OwnerId) -> MemoryResult<Vec<ExecutionRecord>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Execution(record) if record.owner() == owner => Some(record),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionSink for FileJournal {
    async fn record(&self, record: ExecutionRecord) -> MemoryResult<RecordId> {
        let id = record.id();
        self.append(&JournalEntry::Execution(record)).await?;
        Ok(id)
    }

    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ExecutionRecord>> {
        let mut records = self.executions_of(owner).await?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    async fn statistics(&self, owner: OwnerId) -> MemoryResult<ExecutionStats> {
        let records = self.executions_of(owner).await?;
        Ok(ExecutionStats::tally(&records))
    }
}

#[async_trait]
impl ChatHistory for FileJournal {
    async fn record(
        &self,
        question: &str,
        plan: &str,
        answer: &str,
        owner: OwnerId,
        model_label: &str,
    ) -> MemoryResult<RecordId> {
        let record = ChatRecord::new(owner, question, plan, answer, model_label);
        let id = record.id();
        self.append(&JournalEntry::Chat(record)).await?;
        Ok(id)
    }

    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ChatRecord>> {
        let chats: Vec<ChatRecord> = self
            .entries()
            .await?
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Chat(record) if record.owner() == owner => Some(record),
                _ => None,
            })
            .collect();
        let skip = chats.len().saturating_sub(limit);
        Ok(chats.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExecutionStatus;

    fn temp_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("plan-agent-journal-{}.jsonl", RecordId::random()));
        path
    }

    #[tokio::test]
    async fn persists_chats_and_executions() {
        let path = temp_path();
        let journal = FileJournal::open(&path).await.unwrap();
        let owner = OwnerId::new(3);

        for question in ["one", "two", "three"] {
            ChatHistory::record(&journal, question, "Step 1: DirectAnswer - x", "ok", owner, "m")
                .await
                .unwrap();
        }
        let execution = ExecutionRecord::builder(owner, "add")
            .outcome(ExecutionStatus::Success, "3")
            .build()
            .unwrap();
        ExecutionSink::record(&journal, execution).await.unwrap();

        let reopened = FileJournal::open(&path).await.unwrap();
        let chats = ChatHistory::recent(&reopened, owner, 2).await.unwrap();
        let questions: Vec<_> = chats.iter().map(ChatRecord::question).collect();
        assert_eq!(questions, ["two", "three"]);
        assert_eq!(reopened.statistics(owner).await.unwrap().succeeded, 1);
        assert!(
            ChatHistory::recent(&reopened, OwnerId::new(4), 5)
                .await
                .unwrap()
                .is_empty()
        );

        journal.clear().await.unwrap();
        assert!(journal.entries().await.unwrap().is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn skips_corrupt_lines() {
        let path = temp_path();
        std::fs::write(&path, b"not json\n").unwrap();
        let journal = FileJournal::open(&path).await.unwrap();
        assert!(journal.entries().await.unwrap().is_empty());
        let _ = std::fs::remove_file(path);
    }
}
