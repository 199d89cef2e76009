//! Key-value storage collaborator
//!
//! The engine never talks to a database directly. Challenges, credential
//! records and the credential-id uniqueness index all live behind
//! [`KeyValueStore`], a small byte-oriented interface with optional per-entry
//! TTL and the two atomic primitives the protocol needs:
//!
//! - [`take`](KeyValueStore::take): read-and-delete, used for single-use
//!   challenge consumption
//! - [`compare_and_set`](KeyValueStore::compare_and_set): insert-if-absent and
//!   update-if-unchanged, used for credential-id claims and counter bumps
//!
//! Expired entries must behave exactly like absent ones on every operation,
//! whether or not a sweep has physically removed them yet.

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

/// Storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage connection error: {0}")]
    Connection(String),

    #[error("Storage migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A compare-and-set precondition did not hold.
    #[error("Compare-and-set conflict on key {0}")]
    Conflict(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Byte-oriented key-value store with optional TTL.
///
/// Implementations must be safe for concurrent use and every method must be
/// atomic with respect to the single key it touches.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value`, replacing any existing entry. `ttl: None` never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()>;

    /// Removes `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Atomically removes `key` and returns its value if it was live.
    ///
    /// Of any number of concurrent `take` calls on the same key, at most one
    /// observes `Some`.
    async fn take(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the value of `key` if its current live value equals
    /// `expected` byte for byte. `expected: None` means insert-if-absent.
    ///
    /// Fails with [`StorageError::Conflict`] when the precondition does not hold.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    /// Physically removes expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> StorageResult<usize>;

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Serialize a stored record as JSON.
pub(crate) fn encode_record<T: serde::Serialize>(record: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Deserialize a stored JSON record.
pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
