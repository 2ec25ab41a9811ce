//! Optional source of device descriptors kept outside the main config
//!
//! Rows carry identity fields plus JSON-encoded protocol and connection
//! parameters, as an inventory table would. They are read once at startup.
use kvstore::KVDb;
use serde::{Deserialize, Serialize};

use crate::constants::keys;

use super::config::{
    ConfigError, ConnectionInfo, ControlPolicy, DeviceDescriptor, LogOptions, ProtocolInfo,
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub protocol_info: String,
    pub connect_info: String,
}

pub trait DescriptorStore {
    fn list_devices(&self, category: &str) -> Result<Vec<DescriptorRow>, ConfigError>;
}

/// Descriptor rows stored under `devices/<category>` in the key-value store
pub struct KvDescriptorStore<'a> {
    kvs: &'a KVDb,
}

impl<'a> KvDescriptorStore<'a> {
    pub fn new(kvs: &'a KVDb) -> Self {
        Self { kvs }
    }

    pub fn key_for(category: &str) -> String {
        format!("{}/{}", keys::DEVICES_PFX, category)
    }

    pub fn put(&self, category: &str, rows: &[DescriptorRow]) -> Result<(), ConfigError> {
        self.kvs.set(Self::key_for(category), rows)?;
        Ok(())
    }
}

impl DescriptorStore for KvDescriptorStore<'_> {
    fn list_devices(&self, category: &str) -> Result<Vec<DescriptorRow>, ConfigError> {
        Ok(self.kvs.get(Self::key_for(category))?.unwrap_or_default())
    }
}

/// Build a descriptor from a stored row, with full logging and the default control policy
pub fn descriptor_from_row(row: &DescriptorRow, category: &str) -> Result<DeviceDescriptor, ConfigError> {
    let protocol: ProtocolInfo = serde_json::from_str(&row.protocol_info)?;
    let connection: ConnectionInfo = serde_json::from_str(&row.connect_info)?;
    Ok(DeviceDescriptor {
        id: row.id.clone(),
        name: row.name.clone(),
        category: category.to_string(),
        log_options: LogOptions::default(),
        control_policy: ControlPolicy {
            error_handling: true,
            one_shot_session: false,
            reconnect_on_disconnect: true,
            ..Default::default()
        },
        protocol,
        connection,
    })
}

/// Load every row for `category` from `store`
pub fn load_descriptors(
    store: &dyn DescriptorStore,
    category: &str,
) -> Result<Vec<DeviceDescriptor>, ConfigError> {
    let rows = store.list_devices(category)?;
    Ok(descriptors_from_rows(&rows, category))
}

/// Convert stored rows; a malformed row is skipped rather than failing the whole list
pub fn descriptors_from_rows(rows: &[DescriptorRow], category: &str) -> Vec<DeviceDescriptor> {
    let mut descriptors = Vec::with_capacity(rows.len());
    for row in rows {
        match descriptor_from_row(row, category) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => log::error!("Skipping stored device '{}': {}", row.id, e),
        }
    }
    log::info!(
        "Loaded {} of {} stored device(s) for category '{}'",
        descriptors.len(),
        rows.len(),
        category
    );
    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, connect_info: &str) -> DescriptorRow {
        DescriptorRow {
            id: id.to_string(),
            name: format!("Inverter {id}"),
            protocol_info: String::from(
                r#"{"category": "ess", "subCategory": "das_pv_led", "deviceId": "001"}"#,
            ),
            connect_info: connect_info.to_string(),
        }
    }

    #[test]
    fn test_descriptor_from_row() {
        let d = descriptor_from_row(&row("IVT_001", r#"{"type":"socket","port":9000}"#), "PCS")
            .unwrap();
        assert_eq!(d.id, "IVT_001");
        assert_eq!(d.category, "PCS");
        assert_eq!(d.protocol.sub_category, "das_pv_led");
        assert!(d.control_policy.reconnect_on_disconnect);
        assert!(!d.control_policy.one_shot_session);
    }

    #[test]
    fn test_load_skips_malformed_rows() {
        let kvs = KVDb::new(":memory:").unwrap();
        let store = KvDescriptorStore::new(&kvs);
        store
            .put(
                "PCS",
                &[
                    row("IVT_001", r#"{"type":"socket","port":9000}"#),
                    row("IVT_002", "not json"),
                ],
            )
            .unwrap();

        let descriptors = load_descriptors(&store, "PCS").unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, "IVT_001");
    }

    #[test]
    fn test_unknown_category_is_empty() {
        let kvs = KVDb::new(":memory:").unwrap();
        let store = KvDescriptorStore::new(&kvs);
        assert!(load_descriptors(&store, "ESS").unwrap().is_empty());
    }
}
