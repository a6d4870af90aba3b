//! # Queue Storage Provider
//!
//! Turns a size-limited, at-least-once [`QueueTransport`] into a logical
//! queue:
//!
//! - messages larger than the transport limit are offloaded to a blob in
//!   `overflow-{queue}` and replaced by an [`OverflowReference`]
//! - every message carries a dequeue count; messages delivered more often
//!   than the trial limit are quarantined to the failing-messages store
//! - every message returned by `get` is addressed by a [`MessageTicket`]
//!   until exactly one terminal operation (delete, abandon, resume later,
//!   persist) consumes it
//!
//! ## Dequeue counting
//!
//! The effective dequeue count of a delivery is the count carried in the
//! envelope plus the transport's own delivery count. `put` carries zero,
//! `abandon` carries the effective count, `resume_later` carries the
//! effective count minus the delivery it compensates, and revived messages
//! start again at zero.
//!
//! ## Wire format
//!
//! Envelopes and overflow references are always encoded with the provider's
//! serializer. Per-call serializers passed to `put_with`/`get_with` only
//! encode the message itself.

use crate::adapters::InMemoryBlobStorage;
use crate::blob_storage::{put_blob_creating_container, BlobCondition, BlobStorage};
use crate::envelope::{
    base64_bytes, classify_payload, open_envelope, MessageEnvelope, OverflowReference,
    QueuePayload,
};
use crate::error::{QueueError, SerializationError};
use crate::message::{
    GetOptions, MessageId, MessageTicket, PutOptions, QueueName, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::monitoring::{
    NoOpStorageObserver, QuarantineReason, StorageEvent, StorageObserver, StorageOperation,
};
use crate::persisted::{PersistedMessage, PersistedMessageRecord, PersistedMessageStore};
use crate::providers::InMemoryQueueTransport;
use crate::serializer::{DataSerializer, JsonDataSerializer};
use crate::settings::QueueStorageSettings;
use crate::transport::{QueueTransport, TransportMessage};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "queue_storage_tests.rs"]
mod tests;

/// Container holding keep-alive records, one blob per renewed message
pub const KEEP_ALIVE_CONTAINER: &str = "keepalive-messages";

const CREATE_MISSING_QUEUE_POLICY: &str = "create-missing-queue";

// ============================================================================
// In-Flight Bookkeeping
// ============================================================================

/// Everything needed to finalize one message returned by `get`
struct InFlightMessage {
    ticket: MessageTicket,
    receipt: ReceiptHandle,
    /// Envelope raw message: the serialized message or an overflow reference
    raw_message: Bytes,
    overflow: Option<OverflowReference>,
    dequeue_count: u32,
    inserted_at: Timestamp,
    retrieved_at: Instant,
    visible_until: Instant,
    /// Set by the terminal operation that consumed the ticket
    finalized: bool,
}

type InFlightEntry = Arc<AsyncMutex<InFlightMessage>>;

/// Blob written on every keep-alive so a crashed owner's messages can be revived
///
/// `renewed_until` is wall-clock time: records are read by other processes,
/// so the process-local tokio clock that drives visibility cannot be stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeepAliveRecord {
    queue_name: String,
    receipt: ReceiptHandle,
    /// Envelope raw message, an overflow pointer when `is_overflow` is set
    #[serde(with = "base64_bytes")]
    raw_message: Bytes,
    #[serde(default)]
    is_overflow: bool,
    dequeue_count: u32,
    inserted_at: Timestamp,
    renewed_until: Timestamp,
}

fn keep_alive_blob_name(ticket: &MessageTicket) -> String {
    format!("{}/{}", ticket.queue_name(), ticket.id().simple())
}

// ============================================================================
// Provider
// ============================================================================

/// Reliable logical queues over a [`QueueTransport`] and a [`BlobStorage`]
pub struct QueueStorageProvider<S: DataSerializer = JsonDataSerializer> {
    transport: Arc<dyn QueueTransport>,
    blobs: Arc<dyn BlobStorage>,
    persisted: PersistedMessageStore,
    serializer: S,
    settings: QueueStorageSettings,
    observer: Arc<dyn StorageObserver>,
    in_flight: Mutex<HashMap<uuid::Uuid, InFlightEntry>>,
}

impl<S: DataSerializer> std::fmt::Debug for QueueStorageProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStorageProvider")
            .field("transport", &"<QueueTransport>")
            .field("blobs", &"<BlobStorage>")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl QueueStorageProvider<JsonDataSerializer> {
    /// Provider over an in-memory transport and in-memory blobs with default settings
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryQueueTransport::default()),
            Arc::new(InMemoryBlobStorage::new()),
            JsonDataSerializer,
            QueueStorageSettings::default(),
        )
    }
}

impl<S: DataSerializer> QueueStorageProvider<S> {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        blobs: Arc<dyn BlobStorage>,
        serializer: S,
        settings: QueueStorageSettings,
    ) -> Self {
        Self {
            transport,
            persisted: PersistedMessageStore::new(Arc::clone(&blobs)),
            blobs,
            serializer,
            settings,
            observer: Arc::new(NoOpStorageObserver),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the instrumentation sink
    pub fn with_observer(mut self, observer: Arc<dyn StorageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &QueueStorageSettings {
        &self.settings
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// The persisted message store sharing this provider's blob storage
    pub fn persisted_store(&self) -> &PersistedMessageStore {
        &self.persisted
    }

    /// Number of tickets not yet finalized
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // ------------------------------------------------------------------------
    // Put
    // ------------------------------------------------------------------------

    /// Put a message using the provider's serializer
    pub async fn put<T>(
        &self,
        queue: &str,
        message: &T,
        options: PutOptions,
    ) -> Result<(), QueueError>
    where
        T: Serialize + ?Sized,
    {
        self.put_with(queue, message, options, &self.serializer).await
    }

    /// Put a message encoded by the given serializer
    ///
    /// The queue and its overflow container are created when absent.
    pub async fn put_with<T, S2>(
        &self,
        queue: &str,
        message: &T,
        options: PutOptions,
        serializer: &S2,
    ) -> Result<(), QueueError>
    where
        T: Serialize + ?Sized,
        S2: DataSerializer,
    {
        let started = std::time::Instant::now();
        let queue = QueueName::from_str(queue)?;
        let raw = serializer.serialize(message)?;

        self.put_raw(&queue, raw, 0, options).await?;

        self.succeeded(StorageOperation::Put, started);
        Ok(())
    }

    /// Put messages one after another, returning how many were put
    ///
    /// Every message is attempted; individual failures are logged and do not
    /// stop the batch. Only an invalid queue name fails the whole call.
    pub async fn put_range<T, I>(
        &self,
        queue: &str,
        messages: I,
        options: PutOptions,
    ) -> Result<usize, QueueError>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        QueueName::from_str(queue)?;

        let mut count = 0;
        for message in messages {
            match self.put(queue, &message, options).await {
                Ok(()) => count += 1,
                Err(e) => warn!(queue_name = %queue, error = %e, "Failed to put message"),
            }
        }
        Ok(count)
    }

    /// Put messages concurrently with bounded parallelism
    ///
    /// Order is not preserved and successful puts are not rolled back when
    /// another one fails. Returns how many messages were put.
    pub async fn put_range_parallel<T, I>(
        &self,
        queue: &str,
        messages: I,
        options: PutOptions,
    ) -> Result<usize, QueueError>
    where
        T: Serialize + Send + Sync,
        I: IntoIterator<Item = T>,
    {
        QueueName::from_str(queue)?;

        let results: Vec<Result<(), QueueError>> = stream::iter(messages)
            .map(|message| async move { self.put(queue, &message, options).await })
            .buffer_unordered(self.settings.put_range_parallelism.max(1))
            .collect()
            .await;

        let mut count = 0;
        for result in results {
            match result {
                Ok(()) => count += 1,
                Err(e) => warn!(queue_name = %queue, error = %e, "Parallel put failed"),
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------------

    /// Get up to `count` messages using the provider's serializer
    pub async fn get<T>(
        &self,
        queue: &str,
        count: usize,
        options: GetOptions,
    ) -> Result<Vec<ReceivedMessage<T>>, QueueError>
    where
        T: DeserializeOwned,
    {
        self.get_with(queue, count, options, &self.serializer).await
    }

    /// Get up to `count` messages decoded by the given serializer
    ///
    /// Poison messages are quarantined and skipped. Messages that fail to
    /// decode stay invisible on the queue until their dequeue count reaches
    /// the trial limit. A missing queue yields no messages. Each transport
    /// message is returned at most once per call. When the call fails, the
    /// tickets it already registered are released and their messages come
    /// back after the visibility timeout.
    pub async fn get_with<T, S2>(
        &self,
        queue: &str,
        count: usize,
        options: GetOptions,
        serializer: &S2,
    ) -> Result<Vec<ReceivedMessage<T>>, QueueError>
    where
        T: DeserializeOwned,
        S2: DataSerializer,
    {
        let started = std::time::Instant::now();
        let queue = QueueName::from_str(queue)?;
        let visibility_timeout = options
            .visibility_timeout
            .unwrap_or_else(|| self.settings.default_visibility_timeout());
        let max_trials = options
            .max_processing_trials
            .unwrap_or(self.settings.max_processing_trials);

        let mut received = Vec::new();
        if let Err(e) = self
            .receive_into(
                &queue,
                count,
                visibility_timeout,
                max_trials,
                serializer,
                &mut received,
            )
            .await
        {
            self.release_tickets(received.iter().map(|m| &m.ticket));
            warn!(
                queue_name = %queue,
                released = received.len(),
                error = %e,
                "Get failed, releasing the tickets it registered"
            );
            return Err(e);
        }

        debug!(
            queue_name = %queue,
            requested = count,
            returned = received.len(),
            "Messages retrieved"
        );
        self.succeeded(StorageOperation::Get, started);
        Ok(received)
    }

    async fn receive_into<T, S2>(
        &self,
        queue: &QueueName,
        count: usize,
        visibility_timeout: Duration,
        max_trials: u32,
        serializer: &S2,
        received: &mut Vec<ReceivedMessage<T>>,
    ) -> Result<(), QueueError>
    where
        T: DeserializeOwned,
        S2: DataSerializer,
    {
        // Transport messages seen by this call, with the ticket handed out for each
        let mut seen: HashMap<MessageId, Option<MessageTicket>> = HashMap::new();
        let mut remaining = count;

        while remaining > 0 {
            let batch_size = u32::try_from(remaining).unwrap_or(u32::MAX);
            let batch = self
                .transport
                .receive_messages(queue, batch_size, visibility_timeout)
                .await?;
            if batch.is_empty() {
                break;
            }

            let mut wrapped_around = false;
            for delivered in batch {
                if let Some(ticket) = seen.get(&delivered.message_id) {
                    wrapped_around = true;
                    if let Some(ticket) = ticket {
                        self.refresh_receipt(ticket, delivered.receipt, visibility_timeout)
                            .await;
                    }
                    continue;
                }

                remaining = remaining.saturating_sub(1);
                let message_id = delivered.message_id.clone();
                let accepted = self
                    .accept_delivery::<T, S2>(
                        queue,
                        delivered,
                        visibility_timeout,
                        max_trials,
                        serializer,
                    )
                    .await?;
                seen.insert(message_id, accepted.as_ref().map(|m| m.ticket.clone()));
                if let Some(message) = accepted {
                    received.push(message);
                }
            }

            // Everything visible has been seen once already.
            if wrapped_around {
                break;
            }
        }
        Ok(())
    }

    /// Adopt the receipt of a redelivery so the ticket handed out earlier stays live
    async fn refresh_receipt(
        &self,
        ticket: &MessageTicket,
        receipt: ReceiptHandle,
        visibility_timeout: Duration,
    ) {
        let Some(entry) = self.find_in_flight(ticket) else {
            return;
        };
        let mut message = entry.lock().await;
        if message.finalized {
            return;
        }

        debug!(ticket = %ticket, "Message redelivered within one get, keeping its ticket");
        message.receipt = receipt;
        message.visible_until = Instant::now() + visibility_timeout;
    }

    async fn accept_delivery<T, S2>(
        &self,
        queue: &QueueName,
        delivered: TransportMessage,
        visibility_timeout: Duration,
        max_trials: u32,
        serializer: &S2,
    ) -> Result<Option<ReceivedMessage<T>>, QueueError>
    where
        T: DeserializeOwned,
        S2: DataSerializer,
    {
        let retrieved_at = Instant::now();
        let envelope = open_envelope(&self.serializer, &delivered.body);
        let dequeue_count = envelope
            .dequeue_count
            .saturating_add(delivered.dequeue_count);

        let (overflow, unreadable_pointer) = match classify_payload(&self.serializer, &envelope) {
            Ok(QueuePayload::Inline(_)) => (None, None),
            Ok(QueuePayload::Overflow(reference)) => (Some(reference), None),
            Err(e) => (None, Some(e)),
        };
        let raw_message = envelope.raw_message;

        let payload = match unreadable_pointer {
            Some(_) => None,
            None => self.load_payload(&raw_message, overflow.as_ref()).await?,
        };

        if dequeue_count > max_trials {
            self.quarantine::<T>(
                queue,
                &delivered,
                payload,
                overflow.as_ref(),
                dequeue_count,
                QuarantineReason::ProcessingFailure,
            )
            .await?;
            return Ok(None);
        }

        let decoded = match (&payload, &overflow, unreadable_pointer) {
            (Some(data), _, _) => serializer.deserialize::<T>(data),
            (None, _, Some(e)) => Err(e),
            (None, Some(reference), None) => Err(SerializationError::MissingOverflowBlob {
                container: reference.container_name.clone(),
                blob_name: reference.blob_name.clone(),
            }),
            (None, None, None) => Err(SerializationError::IncompatiblePayload {
                type_name: std::any::type_name::<T>().to_string(),
                size: 0,
            }),
        };

        let message = match decoded {
            Ok(message) => message,
            Err(e) if dequeue_count >= max_trials => {
                warn!(
                    queue_name = %queue,
                    message_id = %delivered.message_id,
                    dequeue_count = dequeue_count,
                    error = %e,
                    "Message failed to deserialize on its last trial"
                );
                self.quarantine::<T>(
                    queue,
                    &delivered,
                    payload,
                    overflow.as_ref(),
                    dequeue_count,
                    QuarantineReason::DeserializationFailure,
                )
                .await?;
                return Ok(None);
            }
            Err(e) => {
                warn!(
                    queue_name = %queue,
                    message_id = %delivered.message_id,
                    dequeue_count = dequeue_count,
                    max_trials = max_trials,
                    error = %e,
                    "Message failed to deserialize, leaving it on the queue"
                );
                return Ok(None);
            }
        };

        let ticket = MessageTicket::new(queue.clone());
        let entry = InFlightMessage {
            ticket: ticket.clone(),
            receipt: delivered.receipt,
            raw_message,
            overflow,
            dequeue_count,
            inserted_at: delivered.inserted_at,
            retrieved_at,
            visible_until: retrieved_at + visibility_timeout,
            finalized: false,
        };
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticket.id(), Arc::new(AsyncMutex::new(entry)));

        Ok(Some(ReceivedMessage {
            message,
            ticket,
            dequeue_count,
            inserted_at: delivered.inserted_at,
        }))
    }

    // ------------------------------------------------------------------------
    // Terminal Operations
    // ------------------------------------------------------------------------

    /// Delete a retrieved message, `false` when the ticket was already consumed
    /// or the transport no longer accepts its receipt
    pub async fn delete(&self, ticket: &MessageTicket) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let Some(entry) = self.take_in_flight(ticket) else {
            return Ok(false);
        };
        let mut message = entry.lock().await;
        message.finalized = true;

        let deleted = self
            .transport
            .delete_message(ticket.queue_name(), &message.receipt)
            .await?;

        if deleted {
            if let Some(reference) = &message.overflow {
                self.delete_overflow_blob(reference).await;
            }
        } else {
            debug!(ticket = %ticket, "Receipt no longer valid, message not deleted");
        }
        self.delete_keep_alive_record(ticket).await;

        self.succeeded(StorageOperation::Delete, started);
        Ok(deleted)
    }

    /// Delete several messages, returning how many were deleted
    pub async fn delete_range<'a, I>(&self, tickets: I) -> usize
    where
        I: IntoIterator<Item = &'a MessageTicket>,
    {
        let mut count = 0;
        for ticket in tickets {
            match self.delete(ticket).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!(ticket = %ticket, error = %e, "Failed to delete message"),
            }
        }
        count
    }

    /// Put a retrieved message back on its queue
    ///
    /// The next delivery continues the dequeue count where this one left
    /// off, so repeatedly abandoned messages eventually get quarantined.
    pub async fn abandon(
        &self,
        ticket: &MessageTicket,
        options: PutOptions,
    ) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let requeued = self.requeue(ticket, options, |count| count).await?;
        if requeued {
            self.succeeded(StorageOperation::Abandon, started);
        }
        Ok(requeued)
    }

    /// Abandon several messages, returning how many were put back
    pub async fn abandon_range<'a, I>(&self, tickets: I, options: PutOptions) -> usize
    where
        I: IntoIterator<Item = &'a MessageTicket>,
    {
        let mut count = 0;
        for ticket in tickets {
            match self.abandon(ticket, options).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!(ticket = %ticket, error = %e, "Failed to abandon message"),
            }
        }
        count
    }

    /// Abandon every message still in flight on this provider
    ///
    /// Intended for worker shutdown.
    pub async fn abandon_all(&self, options: PutOptions) -> usize {
        let tickets = self.in_flight_tickets().await;
        let count = self.abandon_range(tickets.iter(), options).await;
        info!(abandoned = count, "Abandoned all in-flight messages");
        count
    }

    /// Put a retrieved message back without counting this delivery
    ///
    /// Deferring a message this way never brings it closer to quarantine.
    pub async fn resume_later(
        &self,
        ticket: &MessageTicket,
        options: PutOptions,
    ) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let requeued = self
            .requeue(ticket, options, |count| count.saturating_sub(1))
            .await?;
        if requeued {
            self.succeeded(StorageOperation::ResumeLater, started);
        }
        Ok(requeued)
    }

    /// Resume several messages later, returning how many were put back
    pub async fn resume_later_range<'a, I>(&self, tickets: I, options: PutOptions) -> usize
    where
        I: IntoIterator<Item = &'a MessageTicket>,
    {
        let mut count = 0;
        for ticket in tickets {
            match self.resume_later(ticket, options).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!(ticket = %ticket, error = %e, "Failed to resume message later"),
            }
        }
        count
    }

    async fn requeue(
        &self,
        ticket: &MessageTicket,
        options: PutOptions,
        carried: impl FnOnce(u32) -> u32,
    ) -> Result<bool, QueueError> {
        let Some(entry) = self.take_in_flight(ticket) else {
            return Ok(false);
        };
        let mut message = entry.lock().await;
        message.finalized = true;

        let queue = ticket.queue_name();
        let carried = carried(message.dequeue_count);
        self.put_wire(
            queue,
            message.raw_message.clone(),
            message.overflow.is_some(),
            carried,
            options,
        )
        .await?;

        if !self.transport.delete_message(queue, &message.receipt).await? {
            warn!(
                ticket = %ticket,
                "Receipt expired before the original copy was removed; message may be delivered twice"
            );
        }
        self.delete_keep_alive_record(ticket).await;

        debug!(ticket = %ticket, carried_dequeue_count = carried, "Message requeued");
        Ok(true)
    }

    /// Move a retrieved message to a persisted store and off the queue
    pub async fn persist(
        &self,
        ticket: &MessageTicket,
        store: &str,
        reason: &str,
    ) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let Some(entry) = self.take_in_flight(ticket) else {
            return Ok(false);
        };
        let mut message = entry.lock().await;
        message.finalized = true;

        let payload = self
            .load_payload(&message.raw_message, message.overflow.as_ref())
            .await?;
        let record = PersistedMessageRecord::new(
            ticket.queue_name().to_string(),
            reason.to_string(),
            message.inserted_at,
            message.dequeue_count,
            payload,
        );

        let moved = self
            .move_to_store(
                ticket.queue_name(),
                &message.receipt,
                message.overflow.as_ref(),
                store,
                &record,
            )
            .await?;
        self.delete_keep_alive_record(ticket).await;

        if moved.is_some() {
            self.succeeded(StorageOperation::Persist, started);
        }
        Ok(moved.is_some())
    }

    /// Persist several messages, returning how many were moved
    pub async fn persist_range<'a, I>(&self, tickets: I, store: &str, reason: &str) -> usize
    where
        I: IntoIterator<Item = &'a MessageTicket>,
    {
        let mut count = 0;
        for ticket in tickets {
            match self.persist(ticket, store, reason).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!(ticket = %ticket, error = %e, "Failed to persist message"),
            }
        }
        count
    }

    // ------------------------------------------------------------------------
    // Keep-Alive and Revival
    // ------------------------------------------------------------------------

    /// Extend the invisibility of a retrieved message by the keep-alive increment
    ///
    /// Returns the total visibility granted since retrieval, or `None` when
    /// the ticket was consumed or the transport rejected the receipt.
    pub async fn keep_alive(&self, ticket: &MessageTicket) -> Result<Option<Duration>, QueueError> {
        let started = std::time::Instant::now();
        let Some(entry) = self.find_in_flight(ticket) else {
            return Ok(None);
        };
        let mut message = entry.lock().await;
        if message.finalized {
            return Ok(None);
        }

        let now = Instant::now();
        let visible_until = message.visible_until.max(now) + self.settings.keep_alive_increment();
        let timeout = visible_until - now;

        let Some(receipt) = self
            .transport
            .update_visibility(ticket.queue_name(), &message.receipt, timeout)
            .await?
        else {
            debug!(ticket = %ticket, "Keep-alive rejected, receipt no longer valid");
            return Ok(None);
        };

        message.receipt = receipt;
        message.visible_until = visible_until;

        let record = KeepAliveRecord {
            queue_name: ticket.queue_name().to_string(),
            receipt: message.receipt.clone(),
            raw_message: message.raw_message.clone(),
            is_overflow: message.overflow.is_some(),
            dequeue_count: message.dequeue_count,
            inserted_at: message.inserted_at,
            renewed_until: Timestamp::now().plus(timeout),
        };
        let data = serde_json::to_vec(&record).map_err(SerializationError::from)?;
        put_blob_creating_container(
            self.blobs.as_ref(),
            KEEP_ALIVE_CONTAINER,
            &keep_alive_blob_name(ticket),
            Bytes::from(data),
            BlobCondition::Always,
        )
        .await?;

        let total = visible_until - message.retrieved_at;
        debug!(
            ticket = %ticket,
            total_visibility_ms = total.as_millis() as u64,
            "Message kept alive"
        );
        self.succeeded(StorageOperation::KeepAlive, started);
        Ok(Some(total))
    }

    /// Put back messages whose keep-alive owner stopped renewing them
    ///
    /// A lapsed message is revived only when its last known receipt still
    /// deletes it, so messages already redelivered elsewhere are not
    /// duplicated. Returns revived counts per queue.
    pub async fn revive_messages(
        &self,
        options: PutOptions,
    ) -> Result<HashMap<String, usize>, QueueError> {
        let started = std::time::Instant::now();
        let now = Timestamp::now();
        let mut counts: HashMap<String, usize> = HashMap::new();

        for name in self.blobs.list_blob_names(KEEP_ALIVE_CONTAINER, "").await? {
            let Some(blob) = self.blobs.get_blob(KEEP_ALIVE_CONTAINER, &name).await? else {
                continue;
            };

            let record: KeepAliveRecord = match serde_json::from_slice(&blob.data) {
                Ok(record) => record,
                Err(e) => {
                    warn!(blob_name = %name, error = %e, "Dropping unreadable keep-alive record");
                    self.blobs.delete_blob(KEEP_ALIVE_CONTAINER, &name).await?;
                    continue;
                }
            };

            if record.renewed_until > now {
                continue;
            }

            let queue = QueueName::from_str(&record.queue_name)?;
            if self.transport.delete_message(&queue, &record.receipt).await? {
                self.put_wire(&queue, record.raw_message, record.is_overflow, 0, options)
                    .await?;
                *counts.entry(record.queue_name).or_default() += 1;
            }
            self.blobs.delete_blob(KEEP_ALIVE_CONTAINER, &name).await?;
        }

        let total: usize = counts.values().sum();
        if total > 0 {
            info!(total = total, queues = counts.len(), "Revived lapsed messages");
        }
        self.observer.notify(StorageEvent::MessagesRevived {
            counts: counts.clone(),
        });
        self.succeeded(StorageOperation::ReviveMessages, started);
        Ok(counts)
    }

    // ------------------------------------------------------------------------
    // Persisted Stores
    // ------------------------------------------------------------------------

    /// Keys of a persisted store
    pub async fn list_persisted(&self, store: &str) -> Result<Vec<String>, QueueError> {
        Ok(self.persisted.list(store).await?)
    }

    /// Metadata of a persisted message with an inspectable view when available
    pub async fn get_persisted(
        &self,
        store: &str,
        key: &str,
    ) -> Result<Option<PersistedMessage>, QueueError> {
        Ok(self.persisted.get(store, key, &self.serializer).await?)
    }

    /// Remove a persisted message; unknown keys are ignored
    pub async fn delete_persisted(&self, store: &str, key: &str) -> Result<(), QueueError> {
        let started = std::time::Instant::now();
        self.persisted.delete(store, key).await?;
        self.succeeded(StorageOperation::DeletePersisted, started);
        Ok(())
    }

    /// Put a persisted message back on its original queue and drop the record
    ///
    /// Returns `false` for unknown keys and for records whose payload was
    /// lost. The record is deleted after the put, so a failure in between
    /// can produce a duplicate but never a loss.
    pub async fn restore_persisted(
        &self,
        store: &str,
        key: &str,
        options: PutOptions,
    ) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let Some(record) = self.persisted.get_record(store, key).await? else {
            return Ok(false);
        };

        let Some(data) = record.payload() else {
            warn!(
                store_name = %store,
                key = %key,
                "Persisted message has no recoverable data, not restoring"
            );
            return Ok(false);
        };

        let queue = QueueName::from_str(&record.queue_name)?;
        self.put_raw(&queue, data.clone(), 0, options).await?;
        self.persisted.delete(store, key).await?;

        info!(store_name = %store, key = %key, queue_name = %queue, "Persisted message restored");
        self.succeeded(StorageOperation::RestorePersisted, started);
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Queue Management
    // ------------------------------------------------------------------------

    /// Names of existing queues starting with `prefix`
    pub async fn list_queues(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        let names = self.transport.list_queues(prefix).await?;
        Ok(names.into_iter().map(|n| n.as_str().to_string()).collect())
    }

    /// Remove every message of a queue together with its overflow blobs
    pub async fn clear(&self, queue: &str) -> Result<(), QueueError> {
        let started = std::time::Instant::now();
        let queue = QueueName::from_str(queue)?;

        self.transport.clear_queue(&queue).await?;

        let container = queue.overflow_container();
        for name in self.blobs.list_blob_names(&container, "").await? {
            self.blobs.delete_blob(&container, &name).await?;
        }
        self.delete_keep_alive_records(&queue).await?;

        info!(queue_name = %queue, "Queue cleared");
        self.succeeded(StorageOperation::ClearQueue, started);
        Ok(())
    }

    /// Delete a queue and its overflow container, `false` when it did not exist
    pub async fn delete_queue(&self, queue: &str) -> Result<bool, QueueError> {
        let started = std::time::Instant::now();
        let queue = QueueName::from_str(queue)?;

        let existed = self.transport.delete_queue(&queue).await?;
        self.blobs.delete_container(&queue.overflow_container()).await?;
        self.delete_keep_alive_records(&queue).await?;

        info!(queue_name = %queue, existed = existed, "Queue deleted");
        self.succeeded(StorageOperation::DeleteQueue, started);
        Ok(existed)
    }

    /// Approximate number of messages, zero for a missing queue
    pub async fn approximate_count(&self, queue: &str) -> Result<usize, QueueError> {
        let queue = QueueName::from_str(queue)?;
        Ok(self.transport.approximate_count(&queue).await?.unwrap_or(0))
    }

    /// Age of the next visible message, `None` when nothing is waiting
    pub async fn approximate_latency(&self, queue: &str) -> Result<Option<Duration>, QueueError> {
        let queue = QueueName::from_str(queue)?;
        let oldest = self.transport.oldest_visible_insertion(&queue).await?;
        Ok(oldest.map(|inserted| inserted.elapsed()))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Enqueue serialized message bytes, offloading them to a blob when too large
    async fn put_raw(
        &self,
        queue: &QueueName,
        raw_message: Bytes,
        carried: u32,
        options: PutOptions,
    ) -> Result<MessageId, QueueError> {
        let body = self
            .serializer
            .serialize(&MessageEnvelope::new(raw_message.clone(), carried))?;

        if body.len() <= self.transport.max_message_size() {
            return self.send(queue, body, options).await;
        }

        let reference = OverflowReference::generate(queue.overflow_container());
        let size = raw_message.len();
        put_blob_creating_container(
            self.blobs.as_ref(),
            &reference.container_name,
            &reference.blob_name,
            raw_message,
            BlobCondition::IfNotExists,
        )
        .await?;
        debug!(
            queue_name = %queue,
            container = %reference.container_name,
            blob_name = %reference.blob_name,
            size = size,
            "Message offloaded to overflow blob"
        );

        let pointer = self.serializer.serialize(&reference)?;
        let body = self
            .serializer
            .serialize(&MessageEnvelope::overflow(pointer, carried))?;

        match self.send(queue, body, options).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.delete_overflow_blob(&reference).await;
                Err(e)
            }
        }
    }

    /// Re-enqueue an envelope raw message as it was received
    ///
    /// An overflow pointer is sent as is, reusing its blob.
    async fn put_wire(
        &self,
        queue: &QueueName,
        raw_message: Bytes,
        is_overflow: bool,
        carried: u32,
        options: PutOptions,
    ) -> Result<MessageId, QueueError> {
        if !is_overflow {
            return self.put_raw(queue, raw_message, carried, options).await;
        }

        let body = self
            .serializer
            .serialize(&MessageEnvelope::overflow(raw_message, carried))?;
        self.send(queue, body, options).await
    }

    async fn send(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: PutOptions,
    ) -> Result<MessageId, QueueError> {
        match self
            .transport
            .send_message(queue, body.clone(), options.time_to_live, options.delay)
            .await
        {
            Err(QueueError::QueueNotFound { .. }) => {
                info!(queue_name = %queue, "Creating missing queue");
                self.transport.create_queue(queue).await?;
                self.observer.notify(StorageEvent::OperationRetried {
                    policy: CREATE_MISSING_QUEUE_POLICY.to_string(),
                    trial: 1,
                    interval: Duration::ZERO,
                });
                self.transport
                    .send_message(queue, body, options.time_to_live, options.delay)
                    .await
            }
            other => other,
        }
    }

    /// Serialized message bytes, `None` when its overflow blob is gone
    async fn load_payload(
        &self,
        raw_message: &Bytes,
        overflow: Option<&OverflowReference>,
    ) -> Result<Option<Bytes>, QueueError> {
        let Some(reference) = overflow else {
            return Ok(Some(raw_message.clone()));
        };

        let blob = self
            .blobs
            .get_blob(&reference.container_name, &reference.blob_name)
            .await?;
        if blob.is_none() {
            warn!(
                container = %reference.container_name,
                blob_name = %reference.blob_name,
                "Overflow blob is missing"
            );
        }
        Ok(blob.map(|b| b.data))
    }

    async fn quarantine<T>(
        &self,
        queue: &QueueName,
        delivered: &TransportMessage,
        payload: Option<Bytes>,
        overflow: Option<&OverflowReference>,
        dequeue_count: u32,
        reason: QuarantineReason,
    ) -> Result<(), QueueError> {
        let store = self.settings.failing_messages_store.as_str();
        let record = PersistedMessageRecord::new(
            queue.to_string(),
            reason.to_string(),
            delivered.inserted_at,
            dequeue_count,
            payload,
        );

        let Some(key) = self
            .move_to_store(queue, &delivered.receipt, overflow, store, &record)
            .await?
        else {
            return Ok(());
        };

        warn!(
            queue_name = %queue,
            store_name = %store,
            key = %key,
            reason = %reason,
            dequeue_count = dequeue_count,
            "Message quarantined"
        );
        self.observer.notify(StorageEvent::MessageQuarantined {
            reason,
            queue_name: queue.to_string(),
            store_name: store.to_string(),
            key,
            message_type: std::any::type_name::<T>().to_string(),
            data: record.data,
        });
        Ok(())
    }

    /// Write a persisted record, then remove the message from the queue
    ///
    /// The record is rolled back when the receipt is no longer valid, since
    /// the message then belongs to another delivery. Returns the record key
    /// when the move happened.
    async fn move_to_store(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        overflow: Option<&OverflowReference>,
        store: &str,
        record: &PersistedMessageRecord,
    ) -> Result<Option<String>, QueueError> {
        let key = self.persisted.insert(store, record).await?;

        if !self.transport.delete_message(queue, receipt).await? {
            debug!(
                queue_name = %queue,
                store_name = %store,
                key = %key,
                "Receipt no longer valid, rolling back persisted record"
            );
            self.persisted.delete(store, &key).await?;
            return Ok(None);
        }

        if let Some(reference) = overflow {
            self.delete_overflow_blob(reference).await;
        }
        Ok(Some(key))
    }

    async fn delete_overflow_blob(&self, reference: &OverflowReference) {
        if let Err(e) = self
            .blobs
            .delete_blob(&reference.container_name, &reference.blob_name)
            .await
        {
            error!(
                container = %reference.container_name,
                blob_name = %reference.blob_name,
                error = %e,
                "Failed to delete overflow blob"
            );
            self.observer.notify(StorageEvent::OverflowBlobDeletionFailed {
                container: reference.container_name.clone(),
                blob_name: reference.blob_name.clone(),
                error: e.to_string(),
            });
        }
    }

    async fn delete_keep_alive_record(&self, ticket: &MessageTicket) {
        if let Err(e) = self
            .blobs
            .delete_blob(KEEP_ALIVE_CONTAINER, &keep_alive_blob_name(ticket))
            .await
        {
            warn!(ticket = %ticket, error = %e, "Failed to delete keep-alive record");
        }
    }

    async fn delete_keep_alive_records(&self, queue: &QueueName) -> Result<(), QueueError> {
        let prefix = format!("{queue}/");
        for name in self.blobs.list_blob_names(KEEP_ALIVE_CONTAINER, &prefix).await? {
            self.blobs.delete_blob(KEEP_ALIVE_CONTAINER, &name).await?;
        }
        Ok(())
    }

    fn take_in_flight(&self, ticket: &MessageTicket) -> Option<InFlightEntry> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ticket.id())
    }

    fn release_tickets<'a>(&self, tickets: impl IntoIterator<Item = &'a MessageTicket>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for ticket in tickets {
            in_flight.remove(&ticket.id());
        }
    }

    fn find_in_flight(&self, ticket: &MessageTicket) -> Option<InFlightEntry> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket.id())
            .cloned()
    }

    async fn in_flight_tickets(&self) -> Vec<MessageTicket> {
        let entries: Vec<InFlightEntry> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut tickets = Vec::with_capacity(entries.len());
        for entry in entries {
            tickets.push(entry.lock().await.ticket.clone());
        }
        tickets
    }

    fn succeeded(&self, operation: StorageOperation, started: std::time::Instant) {
        self.observer.notify(StorageEvent::OperationSucceeded {
            operation,
            duration: started.elapsed(),
        });
    }
}
