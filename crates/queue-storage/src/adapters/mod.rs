//! # Infrastructure Adapters
//!
//! Blob storage implementations usable without a cloud account.

pub mod filesystem_storage;
pub mod memory_storage;

pub use filesystem_storage::FilesystemBlobStorage;
pub use memory_storage::InMemoryBlobStorage;
