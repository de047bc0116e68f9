//! Key-value persistence used for per-source message history.
//!
//! Stores only deal in `serde_json::Value`; typed access goes through
//! [`KeyValueStoreExt`], which works on any store including trait objects.
//! No transactional guarantees are offered: every call is independent.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Asynchronous get/set keyed by string.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Typed helpers on top of [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    /// Fetch and deserialize the value under `key`.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize `value` and store it under `key`.
    async fn set_json<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
