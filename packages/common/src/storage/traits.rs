use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Location and size of a freshly stored package file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the document root, e.g. `package/3/<token>_app.apk`.
    pub path: String,
    /// Basename the client uploaded, used as the download filename.
    pub original_name: String,
    pub size: u64,
}

/// Metadata read from the backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Entity-scoped package file storage.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Store data from an async reader under the entity's directory.
    async fn put_stream(
        &self,
        entity_id: i32,
        original_name: &str,
        reader: BoxReader,
    ) -> Result<StoredFile, StorageError>;

    /// Move an already written file (e.g. a staged upload) into the entity's directory.
    async fn import(&self, entity_id: i32, source: &Path) -> Result<StoredFile, StorageError>;

    /// Size and modification time of a stored file.
    ///
    /// Fails with `NotFound` when the path is missing or not a regular file.
    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError>;

    /// Open a stored file positioned at `start`.
    async fn open_at(&self, path: &str, start: u64) -> Result<BoxReader, StorageError>;

    /// Delete a stored file.
    ///
    /// Returns `true` if the file was deleted, `false` if it did not exist.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Absolute local path of a stored file, for synchronous parsers.
    fn local_path(&self, path: &str) -> Result<PathBuf, StorageError>;
}
