// ============================
// crates/backend-lib/src/storage.rs
// ============================
//! Blob storage abstraction with flat-file implementation.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs as tokio_fs, io::AsyncWriteExt};

use crate::error::AppError;

/// Trait for recording blob backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably write a new blob. Existing identifiers are never overwritten.
    async fn put(&self, file_id: &str, bytes: &[u8]) -> Result<(), AppError>;

    /// Read a blob back
    async fn get(&self, file_id: &str) -> Result<Vec<u8>, AppError>;

    /// Remove a blob; missing blobs are not an error
    async fn delete(&self, file_id: &str) -> Result<(), AppError>;
}

/// Flat-file implementation of the `BlobStore` trait
#[derive(Clone, Debug)]
pub struct FlatFileStorage {
    root: PathBuf,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }
}

#[async_trait]
impl BlobStore for FlatFileStorage {
    /// Write to a hidden part file, fsync, then move into place.
    async fn put(&self, file_id: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.blob_path(file_id);
        if tokio_fs::try_exists(&path).await? {
            return Err(AppError::Storage(format!("blob {file_id} already exists")));
        }

        let part = self.root.join(format!(".{file_id}.part"));
        let result = async {
            let mut file = tokio_fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&part)
                .await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio_fs::rename(&part, &path).await
        }
        .await;

        if let Err(e) = result {
            // part files are never served
            let _ = tokio_fs::remove_file(&part).await;
            return Err(AppError::Storage(format!("writing {file_id}: {e}")));
        }

        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Vec<u8>, AppError> {
        match tokio_fs::read(self.blob_path(file_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("recording {file_id}")))
            },
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn delete(&self, file_id: &str) -> Result<(), AppError> {
        match tokio_fs::remove_file(self.blob_path(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
