//! In-queue wire format.
//!
//! Every transport message body is `serializer.serialize(MessageEnvelope)`.
//! The envelope's raw message is either the serialized user message or a
//! serialized [`OverflowReference`] pointing at a blob that holds it.
//!
//! Decoding is attempted in a fixed order:
//!
//! 1. [`MessageEnvelope`]. Bodies that do not decode as an envelope are
//!    passed through untouched as an inline raw message with a carried
//!    dequeue count of zero, so messages enqueued by older writers remain
//!    readable.
//! 2. [`OverflowReference`], only when the envelope is flagged as overflow.
//!    An unflagged raw message is always the user message, whatever its shape.

use crate::error::SerializationError;
use crate::serializer::DataSerializer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Custom serialization for Bytes
pub(crate) mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

pub(crate) use bytes_serde as base64_bytes;

/// Unit of storage inside the queue transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageEnvelope {
    /// Deliveries carried over from earlier incarnations of this message
    #[serde(rename = "envelope_dequeue_count")]
    pub dequeue_count: u32,

    #[serde(rename = "envelope_raw_message", with = "bytes_serde")]
    pub raw_message: Bytes,

    /// Set when `raw_message` is a serialized [`OverflowReference`]
    #[serde(rename = "envelope_is_overflow", default)]
    pub is_overflow: bool,
}

impl MessageEnvelope {
    /// Wrap raw message bytes
    pub fn new(raw_message: Bytes, dequeue_count: u32) -> Self {
        Self {
            dequeue_count,
            raw_message,
            is_overflow: false,
        }
    }

    /// Wrap a serialized overflow reference
    pub fn overflow(pointer: Bytes, dequeue_count: u32) -> Self {
        Self {
            dequeue_count,
            raw_message: pointer,
            is_overflow: true,
        }
    }
}

/// Pointer enqueued in place of a message too large for the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverflowReference {
    #[serde(rename = "overflow_container")]
    pub container_name: String,

    #[serde(rename = "overflow_blob")]
    pub blob_name: String,
}

impl OverflowReference {
    /// Reference to a freshly named blob in the given container
    pub fn generate(container_name: String) -> Self {
        Self {
            container_name,
            blob_name: ulid::Ulid::new().to_string(),
        }
    }
}

/// Classified content of an envelope's raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePayload {
    /// The serialized message itself
    Inline(Bytes),
    /// The message lives in an overflow blob
    Overflow(OverflowReference),
}

/// Decode a transport body, treating anything else as a legacy inline message
pub fn open_envelope<S: DataSerializer>(serializer: &S, body: &Bytes) -> MessageEnvelope {
    serializer
        .deserialize::<MessageEnvelope>(body)
        .unwrap_or_else(|_| MessageEnvelope::new(body.clone(), 0))
}

/// Decide whether an envelope holds inline data or an overflow pointer
///
/// Fails only for an envelope flagged as overflow whose pointer is unreadable.
pub fn classify_payload<S: DataSerializer>(
    serializer: &S,
    envelope: &MessageEnvelope,
) -> Result<QueuePayload, SerializationError> {
    if !envelope.is_overflow {
        return Ok(QueuePayload::Inline(envelope.raw_message.clone()));
    }

    let reference = serializer.deserialize::<OverflowReference>(&envelope.raw_message)?;
    Ok(QueuePayload::Overflow(reference))
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
