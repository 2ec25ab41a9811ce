use anyhow::{anyhow, Result};
use kvstore::KVDb;
use serde_json::{json, Value};

use crate::argsets::{KvsGetArgs, KvsSetArgs};
use crate::interfaces::kvpath;

pub fn kvs_set(args: KvsSetArgs) -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
    // Values that are not valid JSON are stored as JSON strings
    let value = serde_json::from_str::<Value>(&args.value).unwrap_or_else(|_| json!(args.value));
    kvs.set(&args.key, &value)?;
    log::debug!("Set '{}'", args.key);
    Ok(())
}

pub fn kvs_get(args: KvsGetArgs) -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
    let value: Value = kvs
        .get(&args.key)?
        .ok_or_else(|| anyhow!("No value set for key '{}'", &args.key))?;
    match value.as_str() {
        Some(s) => print!("{s}"),
        None => print!("{value}"),
    }
    Ok(())
}
