//! Common test utilities for queue-storage integration tests
//!
//! This module provides:
//! - Provider builders over in-memory and filesystem backends
//! - Shared message types and payload builders

use queue_storage::monitoring::RecordingStorageObserver;
use queue_storage::{
    BlobStorage, FilesystemBlobStorage, GetOptions, InMemoryBlobStorage, InMemoryQueueTransport,
    JsonDataSerializer, QueueStorageProvider, QueueStorageSettings,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Messages
// ============================================================================

/// Typical work item carried through the queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub customer: String,
    pub lines: Vec<String>,
}

#[allow(dead_code)]
pub fn order(id: u64) -> Order {
    Order {
        id,
        customer: format!("customer-{id}"),
        lines: vec!["widget".to_string(), "gadget".to_string()],
    }
}

/// Payload well above the in-memory transport limit once serialized
#[allow(dead_code)]
pub fn large_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// Get options with a visibility timeout short enough to step past
#[allow(dead_code)]
pub fn short_visibility() -> GetOptions {
    GetOptions::new().with_visibility_timeout(Duration::from_secs(10))
}

// ============================================================================
// Provider Fixtures
// ============================================================================

/// A provider together with handles on its backends
#[allow(dead_code)]
pub struct TestProvider<B> {
    pub provider: Arc<QueueStorageProvider>,
    pub blobs: Arc<B>,
    pub observer: Arc<RecordingStorageObserver>,
}

/// Provider over in-memory queues and blobs
#[allow(dead_code)]
pub fn in_memory_provider(settings: QueueStorageSettings) -> TestProvider<InMemoryBlobStorage> {
    let blobs = Arc::new(InMemoryBlobStorage::new());
    let observer = Arc::new(RecordingStorageObserver::new());
    let provider = build(blobs.clone(), observer.clone(), settings);

    TestProvider {
        provider,
        blobs,
        observer,
    }
}

/// Provider over in-memory queues and a filesystem blob root
#[allow(dead_code)]
pub async fn filesystem_provider(
    root: &Path,
    settings: QueueStorageSettings,
) -> TestProvider<FilesystemBlobStorage> {
    let blobs = Arc::new(
        FilesystemBlobStorage::new(root.to_path_buf())
            .await
            .expect("Failed to create filesystem blob storage"),
    );
    let observer = Arc::new(RecordingStorageObserver::new());
    let provider = build(blobs.clone(), observer.clone(), settings);

    TestProvider {
        provider,
        blobs,
        observer,
    }
}

fn build<B: BlobStorage + 'static>(
    blobs: Arc<B>,
    observer: Arc<RecordingStorageObserver>,
    settings: QueueStorageSettings,
) -> Arc<QueueStorageProvider> {
    Arc::new(
        QueueStorageProvider::new(
            Arc::new(InMemoryQueueTransport::default()),
            blobs,
            JsonDataSerializer,
            settings,
        )
        .with_observer(observer),
    )
}

/// Settings with a custom trial limit
#[allow(dead_code)]
pub fn settings_with_trials(max_processing_trials: u32) -> QueueStorageSettings {
    QueueStorageSettings {
        max_processing_trials,
        ..Default::default()
    }
}
