// ============================
// crates/backend-lib/src/history.rs
// ============================
//! Meeting and recording history.
//!
//! Both logs are ordered by append time. Deletion is by position: an index
//! always refers to the list as it is at the moment the delete runs, so two
//! clients deleting "index 3" concurrently remove two different entries.
//! Callers that need stable references should list, then delete promptly.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use meetmesh_common::{MeetingLogEntry, RecordingMetadata};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};

use crate::error::AppError;

/// Trait for history backends
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_meeting(&self, entry: MeetingLogEntry) -> Result<(), AppError>;

    async fn append_recording(&self, metadata: RecordingMetadata) -> Result<(), AppError>;

    async fn list_meetings(&self) -> Result<Vec<MeetingLogEntry>, AppError>;

    async fn list_recordings(&self) -> Result<Vec<RecordingMetadata>, AppError>;

    /// Remove the meeting entry at `index` of the current list
    async fn delete_meeting(&self, index: usize) -> Result<MeetingLogEntry, AppError>;

    /// Remove the recording entry at `index` of the current list
    async fn delete_recording(&self, index: usize) -> Result<RecordingMetadata, AppError>;
}

fn remove_at<T>(items: &mut Vec<T>, index: usize) -> Result<T, AppError> {
    if index >= items.len() {
        return Err(AppError::IndexOutOfRange {
            index,
            len: items.len(),
        });
    }
    Ok(items.remove(index))
}

/// Process-local history, lost on restart
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    meetings: RwLock<Vec<MeetingLogEntry>>,
    recordings: RwLock<Vec<RecordingMetadata>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append_meeting(&self, entry: MeetingLogEntry) -> Result<(), AppError> {
        self.meetings.write().push(entry);
        Ok(())
    }

    async fn append_recording(&self, metadata: RecordingMetadata) -> Result<(), AppError> {
        self.recordings.write().push(metadata);
        Ok(())
    }

    async fn list_meetings(&self) -> Result<Vec<MeetingLogEntry>, AppError> {
        Ok(self.meetings.read().clone())
    }

    async fn list_recordings(&self) -> Result<Vec<RecordingMetadata>, AppError> {
        Ok(self.recordings.read().clone())
    }

    async fn delete_meeting(&self, index: usize) -> Result<MeetingLogEntry, AppError> {
        remove_at(&mut self.meetings.write(), index)
    }

    async fn delete_recording(&self, index: usize) -> Result<RecordingMetadata, AppError> {
        remove_at(&mut self.recordings.write(), index)
    }
}

/// One JSON-lines file mirrored in memory
struct JsonLog<T> {
    path: PathBuf,
    items: Mutex<Vec<T>>,
}

impl<T: Serialize + DeserializeOwned + Clone> JsonLog<T> {
    async fn open(path: PathBuf) -> Result<Self, AppError> {
        let items = if tokio_fs::try_exists(&path).await? {
            let content = tokio_fs::read_to_string(&path).await?;
            let mut items = Vec::new();
            for line in content.lines().filter(|line| !line.trim().is_empty()) {
                match serde_json::from_str(line) {
                    Ok(item) => items.push(item),
                    // a torn final line from a crash must not brick startup
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable history line"),
                }
            }
            if !content.is_empty() && !content.ends_with('\n') {
                // drop the unterminated tail so the next append starts a fresh line
                let intact = content.rfind('\n').map_or(0, |pos| pos + 1);
                let file = tokio_fs::OpenOptions::new().write(true).open(&path).await?;
                file.set_len(intact as u64).await?;
                file.sync_data().await?;
            }
            items
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    async fn append(&self, item: T) -> Result<(), AppError> {
        let mut items = self.items.lock().await;
        let mut line = serde_json::to_string(&item)?;
        line.push('\n');

        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let previous_len = file.metadata().await?.len();
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            if let Err(truncate) = file.set_len(previous_len).await {
                tracing::error!(path = %self.path.display(), error = %truncate, "could not roll back partial history append");
            }
            return Err(e.into());
        }

        items.push(item);
        Ok(())
    }

    async fn list(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    async fn delete(&self, index: usize) -> Result<T, AppError> {
        let mut items = self.items.lock().await;
        let len = items.len();
        if index >= len {
            return Err(AppError::IndexOutOfRange { index, len });
        }

        let mut remaining = items.clone();
        let removed = remaining.remove(index);
        self.rewrite(&remaining).await?;
        *items = remaining;
        Ok(removed)
    }

    /// Replace the file atomically with the given contents
    async fn rewrite(&self, items: &[T]) -> Result<(), AppError> {
        let mut body = String::new();
        for item in items {
            body.push_str(&serde_json::to_string(item)?);
            body.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        let mut file = tokio_fs::File::create(&tmp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio_fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Flat-file history: `meetings.jsonl` and `recordings.jsonl` under one directory
pub struct JsonLinesHistory {
    meetings: JsonLog<MeetingLogEntry>,
    recordings: JsonLog<RecordingMetadata>,
}

impl JsonLinesHistory {
    /// Open (or create) the history files below `dir`
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        tokio_fs::create_dir_all(dir).await?;
        Ok(Self {
            meetings: JsonLog::open(dir.join("meetings.jsonl")).await?,
            recordings: JsonLog::open(dir.join("recordings.jsonl")).await?,
        })
    }
}

#[async_trait]
impl HistoryStore for JsonLinesHistory {
    async fn append_meeting(&self, entry: MeetingLogEntry) -> Result<(), AppError> {
        self.meetings.append(entry).await
    }

    async fn append_recording(&self, metadata: RecordingMetadata) -> Result<(), AppError> {
        self.recordings.append(metadata).await
    }

    async fn list_meetings(&self) -> Result<Vec<MeetingLogEntry>, AppError> {
        Ok(self.meetings.list().await)
    }

    async fn list_recordings(&self) -> Result<Vec<RecordingMetadata>, AppError> {
        Ok(self.recordings.list().await)
    }

    async fn delete_meeting(&self, index: usize) -> Result<MeetingLogEntry, AppError> {
        self.meetings.delete(index).await
    }

    async fn delete_recording(&self, index: usize) -> Result<RecordingMetadata, AppError> {
        self.recordings.delete(index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meetmesh_common::{ConnectionId, MeetingEvent};
    use tempfile::TempDir;

    fn recording(name: &str) -> RecordingMetadata {
        RecordingMetadata {
            file_identifier: name.to_string(),
            storage_path: format!("/recordings/{name}"),
            room_id: "demo".to_string(),
            uploader_name: "Ada".to_string(),
            uploaded_at: Utc::now(),
            size: 3,
            content_type: "video/webm".to_string(),
        }
    }

    fn meeting(name: &str, event: MeetingEvent) -> MeetingLogEntry {
        MeetingLogEntry {
            room_id: "demo".to_string(),
            display_name: name.to_string(),
            connection_id: ConnectionId::new_v4(),
            event,
            at: Utc::now(),
        }
    }

    fn names(items: &[RecordingMetadata]) -> Vec<&str> {
        items.iter().map(|r| r.file_identifier.as_str()).collect()
    }

    #[tokio::test]
    async fn test_in_memory_delete_keeps_order() {
        let history = InMemoryHistory::new();
        for name in ["a", "b", "c", "d"] {
            history.append_recording(recording(name)).await.unwrap();
        }

        let removed = history.delete_recording(1).await.unwrap();
        assert_eq!(removed.file_identifier, "b");
        assert_eq!(names(&history.list_recordings().await.unwrap()), ["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_in_memory_delete_out_of_range() {
        let history = InMemoryHistory::new();
        history.append_meeting(meeting("Ada", MeetingEvent::Joined)).await.unwrap();

        let err = history.delete_meeting(1).await.unwrap_err();
        assert!(matches!(err, AppError::IndexOutOfRange { index: 1, len: 1 }));
        assert_eq!(history.list_meetings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let history = JsonLinesHistory::open(temp_dir.path()).await.unwrap();
            history.append_meeting(meeting("Ada", MeetingEvent::Joined)).await.unwrap();
            history.append_meeting(meeting("Ada", MeetingEvent::Left)).await.unwrap();
            for name in ["a", "b", "c"] {
                history.append_recording(recording(name)).await.unwrap();
            }
            history.delete_recording(0).await.unwrap();
        }

        let reopened = JsonLinesHistory::open(temp_dir.path()).await.unwrap();
        let meetings = reopened.list_meetings().await.unwrap();
        assert_eq!(meetings.len(), 2);
        assert_eq!(meetings[1].event, MeetingEvent::Left);
        assert_eq!(names(&reopened.list_recordings().await.unwrap()), ["b", "c"]);
    }

    #[tokio::test]
    async fn test_json_lines_skips_torn_line() {
        let temp_dir = TempDir::new().unwrap();
        let line = serde_json::to_string(&recording("ok")).unwrap();
        std::fs::write(
            temp_dir.path().join("recordings.jsonl"),
            format!("{line}\n{{\"fileIdentifier\": \"tru"),
        )
        .unwrap();

        let history = JsonLinesHistory::open(temp_dir.path()).await.unwrap();
        assert_eq!(names(&history.list_recordings().await.unwrap()), ["ok"]);
    }

    #[tokio::test]
    async fn test_append_after_torn_line_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("recordings.jsonl");
        let line = serde_json::to_string(&recording("ok")).unwrap();
        std::fs::write(&path, format!("{line}\n{{\"fileIdentifier\": \"tru")).unwrap();

        {
            let history = JsonLinesHistory::open(temp_dir.path()).await.unwrap();
            history.append_recording(recording("next")).await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let reopened = JsonLinesHistory::open(temp_dir.path()).await.unwrap();
        assert_eq!(names(&reopened.list_recordings().await.unwrap()), ["ok", "next"]);
    }
}
