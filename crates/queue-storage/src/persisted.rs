//! # Persisted Message Store
//!
//! Blob-backed side store for messages taken off a queue, either by an
//! explicit `persist` or by poison quarantine. Records live in the
//! `persisted-messages` container under `{store}/{key}` as JSON documents;
//! keys are ULIDs, so listing a store returns its records oldest first.
//!
//! The store does not depend on a queue transport, which lets operator
//! tooling inspect and clean up persisted messages on its own.

use crate::blob_storage::{put_blob_creating_container, BlobCondition, BlobStorage};
use crate::envelope::base64_bytes;
use crate::error::BlobStorageError;
use crate::message::Timestamp;
use crate::serializer::DataSerializer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Container holding every persisted store
pub const PERSISTED_CONTAINER: &str = "persisted-messages";

// ============================================================================
// Record Types
// ============================================================================

/// Stored form of a persisted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMessageRecord {
    /// Queue the message was taken from
    pub queue_name: String,

    pub reason: String,

    /// When the message was first put on the queue
    pub insertion_time: Timestamp,

    pub persistence_time: Timestamp,

    pub dequeue_count: u32,

    /// `false` when the payload was lost, e.g. a missing overflow blob
    pub is_data_available: bool,

    /// Serialized message as originally put, empty when unavailable
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

impl PersistedMessageRecord {
    /// Record for a message whose payload was recovered
    pub fn new(
        queue_name: String,
        reason: String,
        insertion_time: Timestamp,
        dequeue_count: u32,
        data: Option<Bytes>,
    ) -> Self {
        Self {
            queue_name,
            reason,
            insertion_time,
            persistence_time: Timestamp::now(),
            dequeue_count,
            is_data_available: data.is_some(),
            data: data.unwrap_or_default(),
        }
    }

    /// Payload bytes, `None` when they were not recoverable
    pub fn payload(&self) -> Option<&Bytes> {
        self.is_data_available.then_some(&self.data)
    }
}

/// Persisted message as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedMessage {
    pub key: String,
    pub queue_name: String,
    pub store_name: String,
    pub reason: String,
    pub insertion_time: Timestamp,
    pub persistence_time: Timestamp,
    pub dequeue_count: u32,
    pub is_data_available: bool,
    /// Human-readable view of the payload when the serializer offers one
    pub data_if_recoverable: Option<String>,
}

// ============================================================================
// Store
// ============================================================================

/// Keyed collections of persisted messages on top of a [`BlobStorage`]
#[derive(Clone)]
pub struct PersistedMessageStore {
    storage: Arc<dyn BlobStorage>,
}

impl std::fmt::Debug for PersistedMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedMessageStore")
            .field("storage", &"<BlobStorage>")
            .finish()
    }
}

impl PersistedMessageStore {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    /// Add a record to a store, returning its generated key
    pub async fn insert(
        &self,
        store: &str,
        record: &PersistedMessageRecord,
    ) -> Result<String, BlobStorageError> {
        validate_segment(store)?;

        let data = serde_json::to_vec(record).map_err(|e| BlobStorageError::SerializationFailed {
            message: e.to_string(),
        })?;
        let key = ulid::Ulid::new().to_string();

        let written = put_blob_creating_container(
            self.storage.as_ref(),
            PERSISTED_CONTAINER,
            &blob_name(store, &key),
            Bytes::from(data),
            BlobCondition::IfNotExists,
        )
        .await?;

        if written.is_none() {
            return Err(BlobStorageError::InternalError {
                message: format!("persisted key '{key}' already exists in store '{store}'"),
            });
        }

        info!(
            store_name = %store,
            key = %key,
            queue_name = %record.queue_name,
            reason = %record.reason,
            "Message persisted"
        );

        Ok(key)
    }

    /// Keys of a store, oldest first; an unknown store is empty
    pub async fn list(&self, store: &str) -> Result<Vec<String>, BlobStorageError> {
        validate_segment(store)?;

        let prefix = format!("{store}/");
        let names = self
            .storage
            .list_blob_names(PERSISTED_CONTAINER, &prefix)
            .await?;

        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .filter(|key| !key.contains('/'))
            .collect())
    }

    /// Read the stored record, `None` for an unknown key
    pub async fn get_record(
        &self,
        store: &str,
        key: &str,
    ) -> Result<Option<PersistedMessageRecord>, BlobStorageError> {
        validate_segment(store)?;
        validate_segment(key)?;

        let Some(blob) = self
            .storage
            .get_blob(PERSISTED_CONTAINER, &blob_name(store, key))
            .await?
        else {
            return Ok(None);
        };

        let record = serde_json::from_slice(&blob.data).map_err(|e| {
            BlobStorageError::SerializationFailed {
                message: format!("persisted record {store}/{key}: {e}"),
            }
        })?;
        Ok(Some(record))
    }

    /// Read a persisted message with an inspectable view of its payload
    pub async fn get<S: DataSerializer>(
        &self,
        store: &str,
        key: &str,
        serializer: &S,
    ) -> Result<Option<PersistedMessage>, BlobStorageError> {
        let Some(record) = self.get_record(store, key).await? else {
            return Ok(None);
        };

        let data_if_recoverable = record
            .payload()
            .and_then(|data| serializer.try_inspect(data));

        Ok(Some(PersistedMessage {
            key: key.to_string(),
            queue_name: record.queue_name,
            store_name: store.to_string(),
            reason: record.reason,
            insertion_time: record.insertion_time,
            persistence_time: record.persistence_time,
            dequeue_count: record.dequeue_count,
            is_data_available: record.is_data_available,
            data_if_recoverable,
        }))
    }

    /// Remove a record; deleting an unknown key is not an error
    pub async fn delete(&self, store: &str, key: &str) -> Result<bool, BlobStorageError> {
        validate_segment(store)?;
        validate_segment(key)?;

        let deleted = self
            .storage
            .delete_blob(PERSISTED_CONTAINER, &blob_name(store, key))
            .await?;

        debug!(store_name = %store, key = %key, deleted = deleted, "Persisted message deleted");
        Ok(deleted)
    }
}

fn blob_name(store: &str, key: &str) -> String {
    format!("{store}/{key}")
}

/// Store names and keys are single path segments
fn validate_segment(segment: &str) -> Result<(), BlobStorageError> {
    if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
        return Err(BlobStorageError::InvalidPath {
            path: segment.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "persisted_tests.rs"]
mod tests;
