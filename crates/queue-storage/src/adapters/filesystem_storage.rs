//! # Filesystem Blob Storage Adapter
//!
//! Local filesystem implementation of [`BlobStorage`] for development and
//! operator tooling.

use crate::blob_storage::{validate_blob_path, BlobCondition, BlobStorage, ETag, StoredBlob};
use crate::error::BlobStorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directory under the base path holding in-progress writes
const STAGING_DIR: &str = ".staging";

/// Filesystem-based blob storage implementation
///
/// Each container is a directory under the base path and each blob a file
/// inside it; slashes in blob names become subdirectories. Entity tags are
/// the SHA-256 checksum of the file content.
///
/// # Examples
///
/// ```no_run
/// use queue_storage::adapters::FilesystemBlobStorage;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = FilesystemBlobStorage::new(PathBuf::from("./data/blobs")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemBlobStorage {
    base_path: PathBuf,
}

impl FilesystemBlobStorage {
    /// Create new filesystem blob storage
    ///
    /// # Errors
    ///
    /// Returns error if base path cannot be created or accessed.
    pub async fn new(base_path: PathBuf) -> Result<Self, BlobStorageError> {
        fs::create_dir_all(base_path.join(STAGING_DIR))
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self { base_path })
    }

    /// Root directory of this storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, BlobStorageError> {
        validate_blob_path(container)?;
        if container.starts_with('.') || container.contains('/') {
            return Err(BlobStorageError::InvalidPath {
                path: container.to_string(),
            });
        }
        Ok(self.base_path.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf, BlobStorageError> {
        validate_blob_path(name)?;
        let mut path = self.container_path(container)?;
        for segment in name.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    async fn read_existing(path: &Path) -> Result<Option<Bytes>, BlobStorageError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobStorageError::InternalError {
                message: format!("Failed to read blob {}: {}", path.display(), e),
            }),
        }
    }
}

#[async_trait]
impl BlobStorage for FilesystemBlobStorage {
    async fn create_container(&self, container: &str) -> Result<bool, BlobStorageError> {
        let path = self.container_path(container)?;
        if path.is_dir() {
            return Ok(false);
        }

        fs::create_dir_all(&path)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to create container directory: {}", e),
            })?;
        Ok(true)
    }

    async fn delete_container(&self, container: &str) -> Result<bool, BlobStorageError> {
        let path = self.container_path(container)?;
        if !path.is_dir() {
            return Ok(false);
        }

        fs::remove_dir_all(&path)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to delete container directory: {}", e),
            })?;
        Ok(true)
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        condition: BlobCondition,
    ) -> Result<Option<ETag>, BlobStorageError> {
        let container_path = self.container_path(container)?;
        if !container_path.is_dir() {
            return Err(BlobStorageError::ContainerNotFound {
                container: container.to_string(),
            });
        }

        let blob_path = self.blob_path(container, name)?;
        let current = Self::read_existing(&blob_path)
            .await?
            .map(|existing| ETag::for_content(&existing));
        if !condition.is_satisfied_by(current.as_ref()) {
            return Ok(None);
        }

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobStorageError::InternalError {
                    message: format!("Failed to create directory structure: {}", e),
                })?;
        }

        // Write to a staging file first (atomic write pattern)
        let temp_path = self
            .base_path
            .join(STAGING_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file =
            fs::File::create(&temp_path)
                .await
                .map_err(|e| BlobStorageError::InternalError {
                    message: format!("Failed to create temp file: {}", e),
                })?;

        file.write_all(&data)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to write blob: {}", e),
            })?;

        file.flush()
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to flush file: {}", e),
            })?;

        // Rename to final path (atomic on most filesystems)
        fs::rename(&temp_path, &blob_path)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to rename temp file: {}", e),
            })?;

        Ok(Some(ETag::for_content(&data)))
    }

    async fn get_blob(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<StoredBlob>, BlobStorageError> {
        let blob_path = self.blob_path(container, name)?;
        if blob_path.is_dir() {
            return Ok(None);
        }

        Ok(Self::read_existing(&blob_path).await?.map(|data| StoredBlob {
            etag: ETag::for_content(&data),
            data,
        }))
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, BlobStorageError> {
        let blob_path = self.blob_path(container, name)?;
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobStorageError::InternalError {
                message: format!("Failed to delete blob: {}", e),
            }),
        }
    }

    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, BlobStorageError> {
        let container_path = self.container_path(container)?;
        let mut results = Vec::new();
        if !container_path.is_dir() {
            return Ok(results);
        }

        // Walk the directory tree
        let mut entries = vec![container_path.clone()];
        while let Some(path) = entries.pop() {
            let mut read_dir =
                fs::read_dir(&path)
                    .await
                    .map_err(|e| BlobStorageError::InternalError {
                        message: format!("Failed to read directory: {}", e),
                    })?;

            while let Some(entry) =
                read_dir
                    .next_entry()
                    .await
                    .map_err(|e| BlobStorageError::InternalError {
                        message: format!("Failed to read directory entry: {}", e),
                    })?
            {
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    entries.push(entry_path);
                    continue;
                }

                let Ok(relative) = entry_path.strip_prefix(&container_path) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if name.starts_with(prefix) {
                    results.push(name);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}

#[cfg(test)]
#[path = "filesystem_storage_tests.rs"]
mod tests;
