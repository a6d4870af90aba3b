//! Instrumentation hooks for queue storage operations.
//!
//! The provider reports what it does through a [`StorageObserver`]. Observers
//! are best-effort: `notify` cannot fail and must not block for long, because
//! it is called inline on the operation's task.
//!
//! # Examples
//!
//! ```rust
//! use queue_storage::monitoring::{NoOpStorageObserver, StorageEvent, StorageObserver, StorageOperation};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let observer: Arc<dyn StorageObserver> = Arc::new(NoOpStorageObserver);
//!
//! observer.notify(StorageEvent::OperationSucceeded {
//!     operation: StorageOperation::Put,
//!     duration: Duration::from_millis(3),
//! });
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Events
// ============================================================================

/// Provider operations reported through [`StorageEvent::OperationSucceeded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOperation {
    Put,
    Get,
    Delete,
    Abandon,
    ResumeLater,
    Persist,
    KeepAlive,
    RestorePersisted,
    DeletePersisted,
    ReviveMessages,
    ClearQueue,
    DeleteQueue,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get => "get",
            Self::Delete => "delete",
            Self::Abandon => "abandon",
            Self::ResumeLater => "resume_later",
            Self::Persist => "persist",
            Self::KeepAlive => "keep_alive",
            Self::RestorePersisted => "restore_persisted",
            Self::DeletePersisted => "delete_persisted",
            Self::ReviveMessages => "revive_messages",
            Self::ClearQueue => "clear_queue",
            Self::DeleteQueue => "delete_queue",
        }
    }
}

impl std::fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was moved to the failing-messages store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuarantineReason {
    /// The payload could not be decoded as the requested type
    DeserializationFailure,
    /// The message was delivered more often than the trial limit allows
    ProcessingFailure,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeserializationFailure => "deserialization-failure",
            Self::ProcessingFailure => "processing-failure",
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by the queue storage provider
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    OperationSucceeded {
        operation: StorageOperation,
        duration: Duration,
    },

    /// An operation is being repeated after a recoverable failure
    OperationRetried {
        policy: String,
        trial: u32,
        interval: Duration,
    },

    MessageQuarantined {
        reason: QuarantineReason,
        queue_name: String,
        store_name: String,
        key: String,
        /// Rust type name the caller asked for
        message_type: String,
        /// Raw payload as it was on the queue
        data: Bytes,
    },

    /// Lapsed keep-alive messages put back per queue
    MessagesRevived { counts: HashMap<String, usize> },

    OverflowBlobDeletionFailed {
        container: String,
        blob_name: String,
        error: String,
    },
}

// ============================================================================
// Observer Trait
// ============================================================================

/// Sink for [`StorageEvent`]s
///
/// All methods take `&self` so one observer can be shared as
/// `Arc<dyn StorageObserver>` across tasks. Implementations must be
/// thread-safe and must never panic.
pub trait StorageObserver: Send + Sync {
    fn notify(&self, event: StorageEvent);
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStorageObserver;

impl StorageObserver for NoOpStorageObserver {
    fn notify(&self, _event: StorageEvent) {
        // No-op
    }
}

/// Observer that writes events to `tracing`
///
/// Successful operations are logged at debug level, quarantines and
/// revivals at info, failures at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStorageObserver;

impl StorageObserver for TracingStorageObserver {
    fn notify(&self, event: StorageEvent) {
        match event {
            StorageEvent::OperationSucceeded {
                operation,
                duration,
            } => {
                debug!(
                    operation = %operation,
                    duration_ms = duration.as_millis() as u64,
                    "Queue storage operation succeeded"
                );
            }
            StorageEvent::OperationRetried {
                policy,
                trial,
                interval,
            } => {
                warn!(
                    policy = %policy,
                    trial = trial,
                    interval_ms = interval.as_millis() as u64,
                    "Queue storage operation retried"
                );
            }
            StorageEvent::MessageQuarantined {
                reason,
                queue_name,
                store_name,
                key,
                message_type,
                data,
            } => {
                info!(
                    reason = %reason,
                    queue_name = %queue_name,
                    store_name = %store_name,
                    key = %key,
                    message_type = %message_type,
                    size = data.len(),
                    "Message quarantined"
                );
            }
            StorageEvent::MessagesRevived { counts } => {
                let total: usize = counts.values().sum();
                info!(queues = counts.len(), total = total, "Messages revived");
            }
            StorageEvent::OverflowBlobDeletionFailed {
                container,
                blob_name,
                error,
            } => {
                warn!(
                    container = %container,
                    blob_name = %blob_name,
                    error = %error,
                    "Failed to delete overflow blob"
                );
            }
        }
    }
}

/// Observer that keeps every event in memory
///
/// Intended for tests that assert on instrumentation.
#[derive(Debug, Default)]
pub struct RecordingStorageObserver {
    events: Mutex<Vec<StorageEvent>>,
}

impl RecordingStorageObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<StorageEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded quarantine events
    pub fn quarantined(&self) -> Vec<StorageEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, StorageEvent::MessageQuarantined { .. }))
            .collect()
    }

    /// Number of successful operations of the given kind
    pub fn succeeded(&self, operation: StorageOperation) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(e, StorageEvent::OperationSucceeded { operation: op, .. } if *op == operation)
            })
            .count()
    }
}

impl StorageObserver for RecordingStorageObserver {
    fn notify(&self, event: StorageEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
