//! Async access to [`KVDb`] for callers running inside a tokio runtime
//!
//! SQLite calls are pushed onto the blocking pool so they never stall the
//! runtime's worker threads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{KVDb, KVStoreError};

#[derive(Clone)]
pub struct AsyncKVDb {
    path: PathBuf,
    inner: Arc<Mutex<KVDb>>,
}

fn join_error(e: tokio::task::JoinError) -> KVStoreError {
    KVStoreError::IOError(std::io::Error::other(format!(
        "Failed to run blocking KV store task: {}",
        e
    )))
}

impl AsyncKVDb {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, KVStoreError> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();

        let kvdb = tokio::task::spawn_blocking(move || KVDb::new(open_path))
            .await
            .map_err(join_error)??;

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(kvdb)),
        })
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, KVStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&KVDb) -> Result<T, KVStoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner.blocking_lock()))
            .await
            .map_err(join_error)?
    }

    pub async fn get<T: DeserializeOwned + Send + 'static>(
        &self,
        key: impl AsRef<str>,
    ) -> Result<Option<T>, KVStoreError> {
        let key = key.as_ref().to_string();
        self.with_db(move |db| db.get(&key)).await
    }

    /// Serializes `value` up front, so only the JSON string crosses to the blocking pool
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: impl AsRef<str>,
        value: &V,
    ) -> Result<(), KVStoreError> {
        let key = key.as_ref().to_string();
        let value_json = serde_json::to_string(value)?;
        self.with_db(move |db| db.set_raw(&key, &value_json)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_kvdb_basic_operations() -> Result<(), KVStoreError> {
        let db = AsyncKVDb::new(":memory:").await?;

        db.set("category", "PCS").await?;
        let value: Option<String> = db.get("category").await?;
        assert_eq!(value.as_deref(), Some("PCS"));

        let missing: Option<String> = db.get("missing_key").await?;
        assert_eq!(missing, None);

        Ok(())
    }
}
