//! Durable key-value storage
//!
//! The sync engine persists three blobs, each under a fixed key:
//!
//! - `sync_queue` - the operation queue
//! - `last_sync_time` - timestamp of the last successful full sync
//! - `local_replica` - locally cached entities
//!
//! Values are opaque strings (JSON in practice). Any backend that survives a
//! process restart can implement [`KeyValueStore`].

pub mod error;
mod file;
mod memory;

use futures_util::future::BoxFuture;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// String-keyed blob storage that survives restarts
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if nothing was stored
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>>;

    /// Store `value` under `key`, replacing any previous value
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>>;
}

/// Check that a key is safe to use as a file name
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
