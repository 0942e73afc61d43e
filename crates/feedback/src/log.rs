//! Append-only storage for feedback log entries.

use crate::record::LogEntry;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feedback log line {line} is malformed: {message}")]
    Parse { line: usize, message: String },

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Feedback writer has stopped")]
    Closed,
}

/// Durable sink for log entries.
pub trait FeedbackLog: Send + Sync + 'static {
    fn append(&self, entry: &LogEntry) -> impl Future<Output = Result<(), FeedbackError>> + Send;

    /// Every entry, oldest first.
    fn load(&self) -> impl Future<Output = Result<Vec<LogEntry>, FeedbackError>> + Send;
}

/// One JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlFeedbackLog {
    path: PathBuf,
}

impl JsonlFeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse JSON lines, skipping blanks.
pub fn parse_jsonl(content: &str) -> Result<Vec<LogEntry>, FeedbackError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).map_err(|e| FeedbackError::Parse {
                line: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

impl FeedbackLog for JsonlFeedbackLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), FeedbackError> {
        let mut line = serde_json::to_string(entry).map_err(|e| FeedbackError::Serialize(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LogEntry>, FeedbackError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_jsonl(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory log; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeedbackLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryFeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().await.clone()
    }
}

impl FeedbackLog for MemoryFeedbackLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), FeedbackError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LogEntry>, FeedbackError> {
        Ok(self.entries.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FeedbackState;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("hsclass-feedback-{}.jsonl", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_jsonl_append_and_load() {
        let path = temp_path();
        let log = JsonlFeedbackLog::new(&path);
        assert!(log.load().await.unwrap().is_empty());

        let a = LogEntry::transition(Uuid::new_v4(), FeedbackState::Analyzed);
        let b = LogEntry::transition(Uuid::new_v4(), FeedbackState::Archived);
        log.append(&a).await.unwrap();
        log.append(&b).await.unwrap();

        assert_eq!(log.load().await.unwrap(), vec![a, b]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_parse_reports_line() {
        let good = serde_json::to_string(&LogEntry::transition(Uuid::nil(), FeedbackState::Created)).unwrap();
        let content = format!("{}\n\n{{not json\n", good);
        match parse_jsonl(&content) {
            Err(FeedbackError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_log_shared_between_clones() {
        let log = MemoryFeedbackLog::new();
        let other = log.clone();
        log.append(&LogEntry::transition(Uuid::nil(), FeedbackState::Created)).await.unwrap();
        assert_eq!(other.entries().await.len(), 1);
    }
}
