use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::error;

use super::error::StorageError;
use super::traits::{BoxReader, FileInfo, PackageStore, StoredFile};

/// Top-level directory of package files inside the document root.
pub const PACKAGE_DIR: &str = "package";

/// Filesystem-backed package store.
///
/// Files are laid out per owning entity, prefixed with a random token so that
/// two uploads of the same name never collide:
/// `{root}/package/{entity_id}/{token}_{basename}`
pub struct FilesystemPackageStore {
    root: PathBuf,
    max_size: u64,
}

impl FilesystemPackageStore {
    /// Create a new filesystem package store.
    pub async fn new(root: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(PACKAGE_DIR)).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root, max_size })
    }

    /// Build the relative path for a new file and return it with the cleaned basename.
    fn new_relative_path(
        entity_id: i32,
        original_name: &str,
    ) -> Result<(String, String), StorageError> {
        let basename = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StorageError::InvalidPath(original_name.to_string()))?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        Ok((
            format!("{PACKAGE_DIR}/{entity_id}/{token}_{basename}"),
            basename.to_string(),
        ))
    }

    /// Map a stored relative path onto the document root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let well_formed = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn ensure_parent(&self, dest: &Path) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            log_if_not_writable(parent).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn move_into_place(&self, source: &Path, dest: &Path) -> Result<(), StorageError> {
        self.ensure_parent(dest).await?;

        match fs::rename(source, dest).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                fs::copy(source, dest).await?;
                let _ = fs::remove_file(source).await;
                Ok(())
            }
            Err(e) => {
                if let Some(parent) = dest.parent() {
                    log_if_not_writable(parent).await;
                }
                Err(e.into())
            }
        }
    }
}

async fn log_if_not_writable(dir: &Path) {
    match fs::metadata(dir).await {
        Ok(meta) if meta.permissions().readonly() => {
            error!(dir = %dir.display(), "Directory is not writeable");
        }
        Ok(_) => {}
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Directory is not accessible");
        }
    }
}

#[async_trait]
impl PackageStore for FilesystemPackageStore {
    async fn put_stream(
        &self,
        entity_id: i32,
        original_name: &str,
        mut reader: BoxReader,
    ) -> Result<StoredFile, StorageError> {
        let (relative, basename) = Self::new_relative_path(entity_id, original_name)?;
        let temp_path = self.temp_path();
        let mut total_bytes: u64 = 0;

        let mut buf = vec![0u8; 64 * 1024];
        let mut temp_file = fs::File::create(&temp_path).await?;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            temp_file.write_all(&buf[..n]).await?;
        }

        temp_file.flush().await?;
        drop(temp_file);

        let dest = self.root.join(&relative);
        if let Err(e) = self.move_into_place(&temp_path, &dest).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(StoredFile {
            path: relative,
            original_name: basename,
            size: total_bytes,
        })
    }

    async fn import(&self, entity_id: i32, source: &Path) -> Result<StoredFile, StorageError> {
        let meta = match fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(StorageError::NotFound(source.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(source.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.len() > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: meta.len(),
                limit: self.max_size,
            });
        }

        let original_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(source.display().to_string()))?;
        let (relative, basename) = Self::new_relative_path(entity_id, original_name)?;

        self.move_into_place(source, &self.root.join(&relative))
            .await?;

        Ok(StoredFile {
            path: relative,
            original_name: basename,
            size: meta.len(),
        })
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(FileInfo {
                size: meta.len(),
                modified: DateTime::<Utc>::from(meta.modified()?),
            }),
            Ok(_) => Err(StorageError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn open_at(&self, path: &str, start: u64) -> Result<BoxReader, StorageError> {
        let full = self.resolve(path)?;
        let mut file = match fs::File::open(&full).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(start))
            .await
            .map_err(StorageError::Seek)?;

        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn local_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        self.resolve(path)
    }
}
