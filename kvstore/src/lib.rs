//! Minimal JSON key-value store on top of a single SQLite table
mod async_kvdb;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use async_kvdb::AsyncKVDb;

const TABLENAME: &str = "kvstore";
const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";

#[derive(Error, Debug)]
pub enum KVStoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not (de)serialize value: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

pub struct KVDb(Connection);

impl KVDb {
    /// Open (and create if needed) the database at `path`; ":memory:" gives a private in-memory DB
    pub fn new(path: impl AsRef<Path>) -> Result<Self, KVStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        log::trace!("Opening KV store at {:?}", path);
        let connection = Connection::open(path)?;
        connection.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS '{TABLENAME}' (
                {KEY_FIELD} TEXT PRIMARY KEY NOT NULL,
                {VALUE_FIELD} BLOB NOT NULL
                )"
            ),
            [],
        )?;
        Ok(KVDb(connection))
    }

    fn select(&self, key: &str) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.0
            .query_row(
                &format!("SELECT {VALUE_FIELD} FROM '{TABLENAME}' WHERE {KEY_FIELD} = ?1"),
                [key],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> Result<Option<T>, KVStoreError> {
        self.select(key.as_ref())?
            .map(|v| serde_json::from_slice::<T>(&v))
            .transpose()
            .map_err(Into::into)
    }

    /// Store an already-serialized JSON value
    pub fn set_raw(&self, key: impl AsRef<str>, value_json: &str) -> Result<(), KVStoreError> {
        let mut stmt = self.0.prepare_cached(&format!(
            "INSERT INTO '{TABLENAME}' ({KEY_FIELD}, {VALUE_FIELD}) values (?1, ?2)
            ON CONFLICT({KEY_FIELD}) DO UPDATE SET {VALUE_FIELD}=?2",
        ))?;
        let res = stmt.execute(params![key.as_ref(), value_json.as_bytes()])?;
        log::trace!("Upserted {} row(s) for key '{}'", res, key.as_ref());
        Ok(())
    }

    pub fn set<V: Serialize + ?Sized>(
        &self,
        key: impl AsRef<str>,
        value: &V,
    ) -> Result<(), KVStoreError> {
        self.set_raw(key, &serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_key() {
        let db = KVDb::new(":memory:").unwrap();
        let value: Option<String> = db.get("nope").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_set_overwrites() {
        let db = KVDb::new(":memory:").unwrap();
        db.set("k", &1).unwrap();
        db.set("k", &2).unwrap();
        assert_eq!(db.get::<i64>("k").unwrap(), Some(2));
    }
}
