//! Queue transport interface.
//!
//! A transport is the raw, size-limited, at-least-once cloud queue primitive
//! the queue storage provider builds on. It knows nothing about envelopes,
//! overflow or quarantine; it moves opaque bodies and tracks visibility and
//! delivery counts.

use crate::error::QueueError;
use crate::message::{MessageId, QueueName, ReceiptHandle, Timestamp};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A message as delivered by the transport
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub receipt: ReceiptHandle,
    /// Deliveries of this transport message, including this one
    pub dequeue_count: u32,
    pub inserted_at: Timestamp,
}

/// Interface implemented by queue backends
///
/// Stale receipts are not errors: `delete_message` answers `false` and
/// `update_visibility` answers `None`, because visibility is authoritative at
/// the transport and a receipt may expire at any time.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Create a queue, returning `false` if it already existed
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Delete a queue and its messages, returning `false` if it did not exist
    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Remove every message from a queue; a missing queue is left alone
    async fn clear_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Names of existing queues starting with `prefix`
    async fn list_queues(&self, prefix: &str) -> Result<Vec<QueueName>, QueueError>;

    /// Enqueue a body
    ///
    /// Fails with [`QueueError::QueueNotFound`] when the queue does not exist
    /// and [`QueueError::MessageTooLarge`] when the body exceeds
    /// [`QueueTransport::max_message_size`]. `time_to_live` of `None` keeps
    /// the message until consumed; `delay` of `None` makes it visible
    /// immediately.
    async fn send_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        time_to_live: Option<Duration>,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError>;

    /// Deliver up to `max_messages` visible messages, hiding each for `visibility_timeout`
    ///
    /// A missing queue delivers nothing.
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<TransportMessage>, QueueError>;

    /// Delete a delivered message, `false` when the receipt is stale
    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<bool, QueueError>;

    /// Hide a delivered message for `visibility_timeout` from now
    ///
    /// Returns the replacement receipt, or `None` when the receipt is stale.
    async fn update_visibility(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceiptHandle>, QueueError>;

    /// Approximate number of messages, `None` when the queue does not exist
    async fn approximate_count(&self, queue: &QueueName) -> Result<Option<usize>, QueueError>;

    /// Insertion time of the next visible message, `None` when there is none
    async fn oldest_visible_insertion(
        &self,
        queue: &QueueName,
    ) -> Result<Option<Timestamp>, QueueError>;

    /// Largest body the transport accepts, in bytes
    fn max_message_size(&self) -> usize;
}
