//! In-memory queue transport implementation for testing and embedded use.
//!
//! This module provides a fully functional in-memory queue that:
//! - Implements visibility timeouts and message TTL
//! - Counts deliveries per message exactly once per `receive_messages`
//! - Rotates pop receipts on every delivery and visibility update
//! - Provides thread-safe concurrent access with one lock per queue
//!
//! Deadlines use `tokio::time::Instant`, so tests running on a paused tokio
//! clock can move visibility forward with `tokio::time::advance`.

use crate::error::QueueError;
use crate::message::{MessageId, QueueName, ReceiptHandle, Timestamp};
use crate::settings::InMemoryConfig;
use crate::transport::{QueueTransport, TransportMessage};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Fallback horizon for deadlines that would overflow the clock
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Messages in insertion order
    messages: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn purge_expired(&mut self, now: Instant) {
        self.messages.retain(|m| !m.is_expired(now));
    }

    fn find_by_receipt(&mut self, receipt: &ReceiptHandle) -> Option<usize> {
        self.messages.iter().position(|m| {
            &m.message_id == receipt.message_id()
                && m.pop_receipt.as_deref() == Some(receipt.pop_receipt())
        })
    }
}

/// A message stored in the queue with metadata
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    inserted_at: Timestamp,
    visible_at: Instant,
    expires_at: Option<Instant>,
    dequeue_count: u32,
    pop_receipt: Option<String>,
}

impl StoredMessage {
    /// Check if message is expired based on TTL
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Check if message is available for receiving
    fn is_visible(&self, now: Instant) -> bool {
        now >= self.visible_at
    }

    fn rotate_receipt(&mut self) -> ReceiptHandle {
        let pop_receipt = uuid::Uuid::new_v4().to_string();
        self.pop_receipt = Some(pop_receipt.clone());
        ReceiptHandle::new(self.message_id.clone(), pop_receipt)
    }
}

// ============================================================================
// InMemoryQueueTransport
// ============================================================================

/// In-memory queue transport implementation
pub struct InMemoryQueueTransport {
    queues: RwLock<HashMap<QueueName, Arc<Mutex<InMemoryQueue>>>>,
    config: InMemoryConfig,
}

impl InMemoryQueueTransport {
    /// Create new in-memory transport with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn queue(&self, name: &QueueName) -> Option<Arc<Mutex<InMemoryQueue>>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl Default for InMemoryQueueTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueueTransport {
    async fn create_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(queue) {
            return Ok(false);
        }
        queues.insert(queue.clone(), Arc::new(Mutex::new(InMemoryQueue::default())));
        Ok(true)
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        Ok(queues.remove(queue).is_some())
    }

    async fn clear_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        if let Some(q) = self.queue(queue) {
            q.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .messages
                .clear();
        }
        Ok(())
    }

    async fn list_queues(&self, prefix: &str) -> Result<Vec<QueueName>, QueueError> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<QueueName> = queues
            .keys()
            .filter(|name| name.as_str().starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        time_to_live: Option<Duration>,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError> {
        if body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size: self.config.max_message_size,
            });
        }

        let q = self.queue(queue).ok_or_else(|| QueueError::QueueNotFound {
            queue_name: queue.to_string(),
        })?;

        let now = Instant::now();
        let message_id = MessageId::new();
        let ttl = time_to_live.or(self.config.default_time_to_live);
        let stored = StoredMessage {
            message_id: message_id.clone(),
            body,
            inserted_at: Timestamp::now(),
            visible_at: deadline(now, delay.unwrap_or(Duration::ZERO)),
            expires_at: ttl.map(|ttl| deadline(now, ttl)),
            dequeue_count: 0,
            pop_receipt: None,
        };

        q.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .push_back(stored);
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<TransportMessage>, QueueError> {
        let Some(q) = self.queue(queue) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let limit = max_messages.min(self.config.max_receive_batch) as usize;
        let mut q = q.lock().unwrap_or_else(PoisonError::into_inner);
        q.purge_expired(now);

        let mut delivered = Vec::with_capacity(limit);
        for stored in q.messages.iter_mut() {
            if delivered.len() >= limit {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }

            stored.dequeue_count += 1;
            stored.visible_at = deadline(now, visibility_timeout);
            let receipt = stored.rotate_receipt();
            delivered.push(TransportMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                receipt,
                dequeue_count: stored.dequeue_count,
                inserted_at: stored.inserted_at,
            });
        }

        Ok(delivered)
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
    ) -> Result<bool, QueueError> {
        let Some(q) = self.queue(queue) else {
            return Ok(false);
        };

        let mut q = q.lock().unwrap_or_else(PoisonError::into_inner);
        match q.find_by_receipt(receipt) {
            Some(index) => {
                q.messages.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_visibility(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceiptHandle>, QueueError> {
        let Some(q) = self.queue(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        let mut q = q.lock().unwrap_or_else(PoisonError::into_inner);
        q.purge_expired(now);
        let Some(index) = q.find_by_receipt(receipt) else {
            return Ok(None);
        };

        let stored = &mut q.messages[index];
        stored.visible_at = deadline(now, visibility_timeout);
        Ok(Some(stored.rotate_receipt()))
    }

    async fn approximate_count(&self, queue: &QueueName) -> Result<Option<usize>, QueueError> {
        let Some(q) = self.queue(queue) else {
            return Ok(None);
        };

        let mut q = q.lock().unwrap_or_else(PoisonError::into_inner);
        q.purge_expired(Instant::now());
        Ok(Some(q.messages.len()))
    }

    async fn oldest_visible_insertion(
        &self,
        queue: &QueueName,
    ) -> Result<Option<Timestamp>, QueueError> {
        let Some(q) = self.queue(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        let mut q = q.lock().unwrap_or_else(PoisonError::into_inner);
        q.purge_expired(now);
        Ok(q
            .messages
            .iter()
            .find(|m| m.is_visible(now))
            .map(|m| m.inserted_at))
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }
}
