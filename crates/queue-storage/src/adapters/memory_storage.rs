//! # In-Memory Blob Storage Adapter
//!
//! Process-local implementation of [`BlobStorage`] for tests and embedded use.

use crate::blob_storage::{validate_blob_path, BlobCondition, BlobStorage, ETag, StoredBlob};
use crate::error::BlobStorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

type Container = BTreeMap<String, StoredBlob>;

/// In-memory blob storage
///
/// Containers are kept in a map of ordered maps so that prefix listings come
/// back sorted, matching what cloud blob listings return.
#[derive(Debug, Default)]
pub struct InMemoryBlobStorage {
    containers: RwLock<HashMap<String, Container>>,
}

impl InMemoryBlobStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored in a container
    pub fn blob_count(&self, container: &str) -> usize {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        containers.get(container).map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn create_container(&self, container: &str) -> Result<bool, BlobStorageError> {
        validate_blob_path(container)?;
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), Container::new());
        Ok(true)
    }

    async fn delete_container(&self, container: &str) -> Result<bool, BlobStorageError> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        Ok(containers.remove(container).is_some())
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        condition: BlobCondition,
    ) -> Result<Option<ETag>, BlobStorageError> {
        validate_blob_path(name)?;
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        let blobs =
            containers
                .get_mut(container)
                .ok_or_else(|| BlobStorageError::ContainerNotFound {
                    container: container.to_string(),
                })?;

        let current = blobs.get(name).map(|b| &b.etag);
        if !condition.is_satisfied_by(current) {
            return Ok(None);
        }

        let etag = ETag::for_content(&data);
        blobs.insert(
            name.to_string(),
            StoredBlob {
                data,
                etag: etag.clone(),
            },
        );
        Ok(Some(etag))
    }

    async fn get_blob(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<StoredBlob>, BlobStorageError> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        Ok(containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .cloned())
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, BlobStorageError> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        Ok(containers
            .get_mut(container)
            .map(|blobs| blobs.remove(name).is_some())
            .unwrap_or(false))
    }

    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, BlobStorageError> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        Ok(containers
            .get(container)
            .map(|blobs| {
                blobs
                    .range(prefix.to_string()..)
                    .take_while(|(name, _)| name.starts_with(prefix))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "memory_storage_tests.rs"]
mod tests;
