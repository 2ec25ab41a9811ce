use std::path::PathBuf;

use kvstore::{KVDb, KVStoreError};

use crate::{constants::keys, interfaces::kvpath};

use super::flush::{FlushError, FlushSink};
use super::payload::RoundPayload;

/// Save the latest round to the cache, plus the last report time of every device in it
pub fn save_last_round(cache: &KVDb, payload: &RoundPayload) -> Result<(), KVStoreError> {
    let cached_timestamp: Option<i64> = cache.get(keys::LAST_ROUND_TS)?;
    if cached_timestamp.is_some_and(|ts| ts > payload.t) {
        log::warn!(
            "Cached round (t: {:?}) is newer than round t: {}, overwriting",
            cached_timestamp,
            payload.t
        );
    }

    cache.set(keys::LAST_ROUND, payload)?;
    cache.set(keys::LAST_ROUND_TS, &payload.t)?;

    for device in payload.r.iter().filter(|d| !payload.timed_out.contains(&d.d)) {
        let key = format!("{}/{}", keys::LAST_REPORT_TS_FOR_DEV_PFX, device.d);
        cache.set(&key, &payload.t)?;
    }

    log::debug!("[t: {}] Saved round with {} devices to cache", payload.t, payload.r.len());
    Ok(())
}

/// Keeps the last closed round in the SQLite cache
pub struct CacheSink {
    path: PathBuf,
}

impl CacheSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for CacheSink {
    fn default() -> Self {
        Self::new(kvpath::SQLITE_CACHE.as_path())
    }
}

impl FlushSink for CacheSink {
    fn name(&self) -> &str {
        "cache"
    }

    fn flush(&self, payload: &RoundPayload) -> Result<(), FlushError> {
        let cache = KVDb::new(&self.path)?;
        save_last_round(&cache, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::data_mgmt::payload::DeviceData;
    use crate::device::DataRecord;

    fn device(id: &str) -> DeviceData {
        DeviceData {
            d: id.to_string(),
            name: String::new(),
            measured_at: 1_700_000_000,
            updated_at: None,
            data: DataRecord::with_schema(["pvKw"]),
            refined: BTreeMap::new(),
            troubles: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_cache_sink_tracks_reporting_devices() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CacheSink::new(dir.path().join("cache.db"));
        let payload = RoundPayload {
            t: 1_700_000_000,
            category: String::from("PCS"),
            r: vec![device("IVT_001"), device("IVT_002")],
            timed_out: vec![String::from("IVT_002")],
        };

        sink.flush(&payload).unwrap();

        let cache = KVDb::new(dir.path().join("cache.db")).unwrap();
        assert_eq!(cache.get::<i64>(keys::LAST_ROUND_TS).unwrap(), Some(1_700_000_000));
        let stored: serde_json::Value = cache.get(keys::LAST_ROUND).unwrap().unwrap();
        assert_eq!(stored["r"].as_array().unwrap().len(), 2);

        let ts_key = |id: &str| format!("{}/{}", keys::LAST_REPORT_TS_FOR_DEV_PFX, id);
        assert_eq!(cache.get::<i64>(ts_key("IVT_001")).unwrap(), Some(1_700_000_000));
        assert_eq!(cache.get::<i64>(ts_key("IVT_002")).unwrap(), None);
    }
}
