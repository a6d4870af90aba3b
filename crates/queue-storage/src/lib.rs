//! # Queue Storage
//!
//! Reliable logical queues on top of size-limited, at-least-once cloud queue
//! primitives, with equivalent in-memory and filesystem backends.
//!
//! This library provides:
//! - Typed put/get over any [`QueueTransport`] with pluggable serialization
//! - Transparent offloading of oversized messages to blob storage
//! - Poison-message detection by dequeue count and quarantine to a
//!   persisted store
//! - Explicit ticket-based finalization (delete, abandon, resume later,
//!   persist) and keep-alive renewal for long-running work
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue storage operations
//! - [`message`] - Queue names, tickets, options and received messages
//! - [`envelope`] - In-queue wire format and overflow references
//! - [`serializer`] - Data serializer capability
//! - [`blob_storage`] - Blob storage capability
//! - [`transport`] - Queue transport capability
//! - [`queue_storage`] - The queue storage provider
//! - [`persisted`] - Persisted message store
//! - [`keep_alive`] - Keep-alive message handle
//! - [`monitoring`] - Instrumentation hooks
//! - [`settings`] - Configuration loading
//! - [`adapters`] / [`providers`] - In-memory and filesystem backends
//!
//! ## Example
//!
//! ```rust
//! use queue_storage::{GetOptions, PutOptions, QueueStorageProvider, ReceivedMessage};
//!
//! # tokio_test::block_on(async {
//! let provider = QueueStorageProvider::in_memory();
//!
//! provider.put("orders", &42u32, PutOptions::new()).await?;
//!
//! let received: Vec<ReceivedMessage<u32>> = provider.get("orders", 1, GetOptions::new()).await?;
//! assert_eq!(received[0].message, 42);
//!
//! assert!(provider.delete(&received[0].ticket).await?);
//! # Ok::<(), queue_storage::QueueError>(())
//! # }).unwrap();
//! ```

// Module declarations
pub mod adapters;
pub mod blob_storage;
pub mod envelope;
pub mod error;
pub mod keep_alive;
pub mod message;
pub mod monitoring;
pub mod persisted;
pub mod providers;
pub mod queue_storage;
pub mod serializer;
pub mod settings;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use adapters::{FilesystemBlobStorage, InMemoryBlobStorage};
pub use blob_storage::{BlobCondition, BlobStorage, ETag, StoredBlob};
pub use envelope::{MessageEnvelope, OverflowReference};
pub use error::{
    BlobStorageError, ConfigurationError, QueueError, SerializationError, ValidationError,
};
pub use keep_alive::{KeepAliveMessageHandle, KeepAliveOptions};
pub use message::{
    GetOptions, MessageId, MessageTicket, PutOptions, QueueName, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
pub use monitoring::{
    NoOpStorageObserver, QuarantineReason, StorageEvent, StorageObserver, StorageOperation,
    TracingStorageObserver,
};
pub use persisted::{PersistedMessage, PersistedMessageStore};
pub use providers::InMemoryQueueTransport;
pub use queue_storage::QueueStorageProvider;
pub use serializer::{DataSerializer, JsonDataSerializer};
pub use settings::{InMemoryConfig, QueueStorageSettings};
pub use transport::{QueueTransport, TransportMessage};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
