//! # Blob Storage Interface
//!
//! Container/name addressed blob capability used for overflow payloads,
//! persisted messages and keep-alive records.

use crate::error::BlobStorageError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Utility Functions
// ============================================================================

/// Compute SHA-256 checksum of data
///
/// Returns hex-encoded checksum string. Blob implementations use it as the
/// entity tag of the stored content.
///
/// # Examples
///
/// ```
/// use queue_storage::blob_storage::compute_checksum;
///
/// let checksum = compute_checksum(b"test data");
/// assert_eq!(checksum.len(), 64); // SHA-256 hex is 64 characters
/// ```
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Validate a container name or blob name
///
/// Names are slash separated relative paths. Empty segments, `.` and `..`
/// and backslashes are rejected so that no implementation can be tricked
/// into addressing something outside its container.
pub fn validate_blob_path(path: &str) -> Result<(), BlobStorageError> {
    let invalid = path.is_empty()
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(BlobStorageError::InvalidPath {
            path: path.to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Supporting Types
// ============================================================================

/// Entity tag identifying one version of a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(String);

impl ETag {
    /// Entity tag for the given content
    pub fn for_content(data: &[u8]) -> Self {
        Self(compute_checksum(data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Precondition applied to a blob write
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BlobCondition {
    /// Write unconditionally
    #[default]
    Always,
    /// Write only when no blob exists under the name
    IfNotExists,
    /// Write only when the current blob carries this entity tag
    IfMatch(ETag),
}

impl BlobCondition {
    /// Check whether a write may proceed given the current entity tag
    pub fn is_satisfied_by(&self, current: Option<&ETag>) -> bool {
        match self {
            Self::Always => true,
            Self::IfNotExists => current.is_none(),
            Self::IfMatch(expected) => current == Some(expected),
        }
    }
}

/// Blob content together with its entity tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub etag: ETag,
}

// ============================================================================
// Core Trait
// ============================================================================

/// Interface for blob storage operations
///
/// Writes into a missing container fail with
/// [`BlobStorageError::ContainerNotFound`]; callers create containers on
/// demand. Reads and deletes of missing blobs or containers are not errors.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Create a container, returning `false` if it already existed
    async fn create_container(&self, container: &str) -> Result<bool, BlobStorageError>;

    /// Delete a container and all of its blobs, returning `false` if it did not exist
    async fn delete_container(&self, container: &str) -> Result<bool, BlobStorageError>;

    /// Store a blob
    ///
    /// Returns the new entity tag, or `None` when the condition was not met.
    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        condition: BlobCondition,
    ) -> Result<Option<ETag>, BlobStorageError>;

    /// Read a blob, `None` when it does not exist
    async fn get_blob(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<StoredBlob>, BlobStorageError>;

    /// Delete a blob, returning `false` if it did not exist
    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, BlobStorageError>;

    /// List blob names starting with `prefix`, sorted
    ///
    /// A missing container lists as empty.
    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, BlobStorageError>;
}

/// Store a blob, creating its container first if needed
pub async fn put_blob_creating_container(
    storage: &dyn BlobStorage,
    container: &str,
    name: &str,
    data: Bytes,
    condition: BlobCondition,
) -> Result<Option<ETag>, BlobStorageError> {
    match storage
        .put_blob(container, name, data.clone(), condition.clone())
        .await
    {
        Err(BlobStorageError::ContainerNotFound { .. }) => {
            storage.create_container(container).await?;
            storage.put_blob(container, name, data, condition).await
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "blob_storage_tests.rs"]
mod tests;
