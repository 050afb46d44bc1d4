// ============================
// crates/backend-lib/src/recording.rs
// ============================
//! Recording ingest: blob first, metadata second.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use meetmesh_common::RecordingMetadata;
use metrics::{counter, histogram};

use crate::error::AppError;
use crate::history::HistoryStore;
use crate::metrics::{RECORDING_FAILED, RECORDING_INGESTED, RECORDING_SIZE};
use crate::storage::BlobStore;
use crate::validation::{sanitize_file_name, validate_file_identifier};

/// Millisecond clock that never hands out the same value twice
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock milliseconds, bumped past the previous value when needed
    pub fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_ms
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Guess a content type from the stored file name
pub fn content_type_for(file_id: &str) -> &'static str {
    let ext = file_id
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "video/webm",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "ogg" | "ogv" => "video/ogg",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Accepts uploaded recordings and records their metadata
pub struct RecordingIngest<S> {
    blobs: S,
    history: Arc<dyn HistoryStore>,
    clock: MonotonicClock,
}

impl<S: BlobStore> RecordingIngest<S> {
    pub fn new(blobs: S, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            blobs,
            history,
            clock: MonotonicClock::new(),
        }
    }

    /// Persist `bytes` and append its metadata.
    ///
    /// Metadata is only appended after the blob write succeeded. If the
    /// metadata append itself fails the blob is removed again.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest(
        &self,
        room_id: &str,
        uploader_name: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<RecordingMetadata, AppError> {
        let millis = self.clock.next_millis();
        let file_identifier = format!("{millis}-{}", sanitize_file_name(original_name));

        if let Err(e) = self.blobs.put(&file_identifier, bytes).await {
            counter!(RECORDING_FAILED).increment(1);
            tracing::warn!(file = %file_identifier, error = %e, "recording blob write failed");
            return Err(e);
        }

        let metadata = RecordingMetadata {
            storage_path: format!("/recordings/{file_identifier}"),
            content_type: content_type_for(&file_identifier).to_string(),
            file_identifier,
            room_id: room_id.to_string(),
            uploader_name: uploader_name.to_string(),
            uploaded_at: Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_else(Utc::now),
            size: bytes.len() as u64,
        };

        if let Err(e) = self.history.append_recording(metadata.clone()).await {
            counter!(RECORDING_FAILED).increment(1);
            if let Err(cleanup) = self.blobs.delete(&metadata.file_identifier).await {
                tracing::warn!(file = %metadata.file_identifier, error = %cleanup, "orphaned recording blob");
            }
            return Err(e);
        }

        counter!(RECORDING_INGESTED).increment(1);
        histogram!(RECORDING_SIZE).record(bytes.len() as f64);
        tracing::info!(file = %metadata.file_identifier, room = %room_id, "recording ingested");
        Ok(metadata)
    }

    /// Read a stored recording with its content type
    pub async fn fetch(&self, file_id: &str) -> Result<(Vec<u8>, &'static str), AppError> {
        let file_id = validate_file_identifier(file_id)?;
        let bytes = self.blobs.get(file_id).await?;
        Ok((bytes, content_type_for(file_id)))
    }

    /// Delete the recording at `index` of the current list, metadata first
    pub async fn delete_recording(&self, index: usize) -> Result<RecordingMetadata, AppError> {
        let removed = self.history.delete_recording(index).await?;
        if let Err(e) = self.blobs.delete(&removed.file_identifier).await {
            tracing::warn!(file = %removed.file_identifier, error = %e, "recording blob not removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::storage::FlatFileStorage;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Blob store whose writes always fail
    struct BrokenStorage;

    #[async_trait]
    impl BlobStore for BrokenStorage {
        async fn put(&self, _file_id: &str, _bytes: &[u8]) -> Result<(), AppError> {
            Err(AppError::Storage("disk full".to_string()))
        }

        async fn get(&self, file_id: &str) -> Result<Vec<u8>, AppError> {
            Err(AppError::NotFound(file_id.to_string()))
        }

        async fn delete(&self, _file_id: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn setup() -> (Arc<RecordingIngest<FlatFileStorage>>, Arc<InMemoryHistory>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FlatFileStorage::new(temp_dir.path()).unwrap();
        let history = Arc::new(InMemoryHistory::new());
        let ingest = Arc::new(RecordingIngest::new(storage, history.clone()));
        (ingest, history, temp_dir)
    }

    #[test]
    fn test_monotonic_clock_never_repeats() {
        let clock = MonotonicClock::new();
        let mut prev = clock.next_millis();
        for _ in 0..1000 {
            let next = clock.next_millis();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("1-demo.webm"), "video/webm");
        assert_eq!(content_type_for("1-DEMO.MP4"), "video/mp4");
        assert_eq!(content_type_for("1-noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_ingest_records_metadata() {
        let (ingest, history, _temp_dir) = setup();

        let meta = ingest.ingest("demo", "Ada", "demo-1.webm", b"bytes").await.unwrap();
        assert!(meta.file_identifier.ends_with("-demo-1.webm"));
        assert_eq!(meta.storage_path, format!("/recordings/{}", meta.file_identifier));
        assert_eq!(meta.room_id, "demo");
        assert_eq!(meta.uploader_name, "Ada");
        assert_eq!(meta.size, 5);
        assert_eq!(meta.content_type, "video/webm");

        assert_eq!(history.list_recordings().await.unwrap(), vec![meta.clone()]);
        let (bytes, content_type) = ingest.fetch(&meta.file_identifier).await.unwrap();
        assert_eq!(bytes, b"bytes");
        assert_eq!(content_type, "video/webm");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_history_unchanged() {
        let history = Arc::new(InMemoryHistory::new());
        let ingest = RecordingIngest::new(BrokenStorage, history.clone());

        let err = ingest.ingest("demo", "Ada", "clip.webm", b"bytes").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(history.list_recordings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_unique_ids() {
        let (ingest, history, _temp_dir) = setup();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let ingest = ingest.clone();
            tasks.spawn(async move {
                ingest
                    .ingest("demo", &format!("user-{i}"), "same-name.webm", b"x")
                    .await
                    .unwrap()
            });
        }

        let mut ids = HashSet::new();
        while let Some(meta) = tasks.join_next().await {
            ids.insert(meta.unwrap().file_identifier);
        }
        assert_eq!(ids.len(), 20);
        assert_eq!(history.list_recordings().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_delete_recording_removes_blob() {
        let (ingest, history, _temp_dir) = setup();
        let first = ingest.ingest("demo", "Ada", "a.webm", b"a").await.unwrap();
        let second = ingest.ingest("demo", "Ada", "b.webm", b"b").await.unwrap();

        let removed = ingest.delete_recording(0).await.unwrap();
        assert_eq!(removed, first);
        assert!(ingest.fetch(&first.file_identifier).await.is_err());
        assert_eq!(history.list_recordings().await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_fetch_rejects_traversal() {
        let (ingest, _history, _temp_dir) = setup();
        assert!(matches!(
            ingest.fetch("../Cargo.toml").await,
            Err(AppError::Validation(_))
        ));
    }
}
