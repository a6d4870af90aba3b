//! # Data Serializer
//!
//! Pluggable conversion between typed messages and the bytes stored in queues
//! and blobs. The concrete message type is chosen by the caller through
//! generics; the serializer only sees bytes and serde types.

use crate::error::SerializationError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializer capability consumed by the queue storage provider
///
/// Implementations must be deterministic enough that
/// `deserialize(serialize(x)) == x` for every supported type. Failing to
/// decode bytes as the requested type must surface as a
/// [`SerializationError`], never as a panic.
pub trait DataSerializer: Send + Sync + 'static {
    /// Encode a value into bytes
    fn serialize<T>(&self, value: &T) -> Result<Bytes, SerializationError>
    where
        T: Serialize + ?Sized;

    /// Decode bytes into the requested type
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, SerializationError>
    where
        T: DeserializeOwned;

    /// Best-effort human-readable view of serialized bytes
    ///
    /// Used to give operators something to look at for quarantined messages
    /// whose strict typed decode fails. Returns `None` when the bytes have no
    /// intermediate representation.
    fn try_inspect(&self, _data: &[u8]) -> Option<String> {
        None
    }
}

/// Default serializer backed by `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataSerializer;

impl DataSerializer for JsonDataSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Bytes, SerializationError>
    where
        T: Serialize + ?Sized,
    {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, SerializationError>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(data)?)
    }

    fn try_inspect(&self, data: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(data).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }
}

#[cfg(test)]
#[path = "serializer_tests.rs"]
mod tests;
