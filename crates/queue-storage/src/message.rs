//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name
///
/// Queue names follow cloud queue naming rules: 1-63 characters, lowercase
/// ASCII letters, digits and hyphens, no leading/trailing or consecutive
/// hyphens. The same name is used to derive the overflow container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only lowercase ASCII letters, digits, and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Name of the blob container holding overflow payloads for this queue
    pub fn overflow_container(&self) -> String {
        format!("overflow-{}", self.0)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Transport-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Time elapsed since this timestamp, zero if it lies in the future
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// Timestamp shifted forward by the given duration
    pub fn plus(&self, duration: Duration) -> Self {
        match chrono::Duration::from_std(duration) {
            Ok(delta) => Self(self.0 + delta),
            Err(_) => Self(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Transport Tokens
// ============================================================================

/// Opaque token for deleting or updating a delivered transport message
///
/// The pop receipt changes on every delivery and every visibility update, so
/// a receipt held by a worker whose message was redelivered elsewhere is
/// stale and rejected by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHandle {
    message_id: MessageId,
    pop_receipt: String,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(message_id: MessageId, pop_receipt: String) -> Self {
        Self {
            message_id,
            pop_receipt,
        }
    }

    /// Transport message this receipt refers to
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Get pop receipt string
    pub fn pop_receipt(&self) -> &str {
        &self.pop_receipt
    }
}

/// Ticket identifying one in-flight message returned by `get`
///
/// Every terminal operation (delete, abandon, resume later, persist) is
/// addressed by ticket. A ticket can be finalized once; later attempts
/// report `false`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageTicket {
    id: uuid::Uuid,
    queue_name: QueueName,
}

impl MessageTicket {
    pub(crate) fn new(queue_name: QueueName) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            queue_name,
        }
    }

    pub(crate) fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Queue the message was retrieved from
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }
}

impl std::fmt::Display for MessageTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.queue_name, self.id)
    }
}

/// A message returned by `get` together with its ticket
#[derive(Debug, Clone)]
pub struct ReceivedMessage<T> {
    pub message: T,
    pub ticket: MessageTicket,
    /// Effective dequeue count at retrieval time
    pub dequeue_count: u32,
    pub inserted_at: Timestamp,
}

// ============================================================================
// Put and Get Options
// ============================================================================

/// Visibility parameters applied when a message is enqueued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Time-to-live, `None` keeps the message until consumed
    pub time_to_live: Option<Duration>,
    /// Initial invisibility, `None` makes the message visible immediately
    pub delay: Option<Duration>,
}

impl PutOptions {
    /// Create new put options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Delay the first visibility of the message
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Per-call overrides for `get`
///
/// Unset fields fall back to the provider settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub visibility_timeout: Option<Duration>,
    pub max_processing_trials: Option<u32>,
}

impl GetOptions {
    /// Create new get options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long retrieved messages stay invisible
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Set the number of deliveries tolerated before quarantine
    pub fn with_max_processing_trials(mut self, trials: u32) -> Self {
        self.max_processing_trials = Some(trials);
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
