//! JSON file backed key-value store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{KeyValueStore, StoreError};

/// Store that keeps the whole map in a single JSON document on disk.
///
/// The file is read once on [`open`](JsonFileStore::open) and rewritten on
/// every `set` through a temporary file and a rename, so a crash mid-write
/// leaves the previous document intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<HashMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file starts an empty store.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data: HashMap<String, Value> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), keys = data.len(), "Opened JSON file store");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &HashMap<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted store");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        // Held across the write so concurrent sets hit the disk in order.
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), value);
        self.persist(&data).await
    }
}
