use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kvstore::{AsyncKVDb, KVDb, KVStoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{defaults, keys};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    KVStore(#[from] KVStoreError),
    #[error("no config found in key-value store")]
    NotFound,
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration of the polling node
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    /// Use the in-process echo transport instead of real devices
    #[serde(default)]
    pub dev_mode: bool,
    /// Output columns derived from record fields for every flushed device
    #[serde(default)]
    pub refined_fields: Vec<FieldMapping>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Deadline after which an open round is force-closed; 0 disables it
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
    /// Start ticks on multiples of the interval (wall clock), like a cron schedule
    #[serde(default)]
    pub align_to_interval: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            round_timeout_secs: default_round_timeout_secs(),
            align_to_interval: false,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        (self.round_timeout_secs > 0).then(|| Duration::from_secs(self.round_timeout_secs))
    }
}

/// Static per-device configuration; never mutated after load
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub log_options: LogOptions,
    #[serde(default)]
    pub control_policy: ControlPolicy,
    pub protocol: ProtocolInfo,
    pub connection: ConnectionInfo,
}

pub type SharedDescriptor = Arc<DeviceDescriptor>;

/// Which per-device events get logged
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogOptions {
    #[serde(default = "default_true")]
    pub commander_response: bool,
    #[serde(default = "default_true")]
    pub session_error: bool,
    #[serde(default = "default_true")]
    pub session_event: bool,
    #[serde(default = "default_true")]
    pub receive_data: bool,
    #[serde(default = "default_true")]
    pub session_message: bool,
    #[serde(default = "default_true")]
    pub transfer_command: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            commander_response: true,
            session_error: true,
            session_event: true,
            receive_data: true,
            session_message: true,
            transfer_command: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPolicy {
    #[serde(default = "default_true")]
    pub error_handling: bool,
    #[serde(default)]
    pub one_shot_session: bool,
    #[serde(default = "default_true")]
    pub reconnect_on_disconnect: bool,
    /// Consecutive parse errors tolerated before the device gives up on the round
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            error_handling: true,
            one_shot_session: false,
            reconnect_on_disconnect: true,
            max_parse_retries: default_max_parse_retries(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolInfo {
    pub category: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionInfo {
    #[serde(rename_all = "camelCase")]
    Socket {
        #[serde(default = "default_address")]
        address: String,
        port: u16,
    },
    #[serde(rename_all = "camelCase")]
    Serial { port: String, baud_rate: u32 },
}

/// Copy record field `from` into output column `to`, scaled and rounded if numeric
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub from: String,
    pub to: String,
    /// Divisor applied to numeric values
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    defaults::CATEGORY.to_string()
}

fn default_interval_secs() -> u64 {
    defaults::ROUND_INTERVAL.as_secs()
}

fn default_startup_delay_secs() -> u64 {
    defaults::STARTUP_DELAY.as_secs()
}

fn default_round_timeout_secs() -> u64 {
    defaults::ROUND_TIMEOUT.as_secs()
}

fn default_max_parse_retries() -> u32 {
    defaults::MAX_PARSE_RETRIES
}

fn default_address() -> String {
    String::from("localhost")
}

impl FleetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "schedule.intervalSecs must be greater than zero",
            )));
        }
        if let Some(mapping) = self.refined_fields.iter().find(|m| m.scale == Some(0.0)) {
            return Err(ConfigError::Invalid(format!(
                "refined field '{}' has a zero scale",
                mapping.to
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device id '{}'",
                    device.id
                )));
            }
        }
        Ok(())
    }

    /// Point every serially connected device at `port_name`
    pub fn override_serial_port(&mut self, port_name: &str) -> usize {
        override_serial_port(&mut self.devices, port_name)
    }
}

/// Rewrite the port of every serially connected descriptor; returns how many changed
pub fn override_serial_port(devices: &mut [DeviceDescriptor], port_name: &str) -> usize {
    let mut changed = 0;
    for device in devices.iter_mut() {
        if let ConnectionInfo::Serial { port, .. } = &mut device.connection {
            *port = port_name.to_string();
            changed += 1;
        }
    }
    changed
}

pub fn from_str(config_raw: &str) -> Result<FleetConfig, ConfigError> {
    let config = serde_json::from_str::<FleetConfig>(config_raw)?;
    config.validate()?;
    Ok(config)
}

pub fn from_file(path: impl AsRef<Path>) -> Result<FleetConfig, ConfigError> {
    from_str(&std::fs::read_to_string(path)?)
}

pub fn get(kvs: &KVDb) -> Result<FleetConfig, ConfigError> {
    let config: FleetConfig = kvs.get(keys::CONFIG)?.ok_or(ConfigError::NotFound)?;
    config.validate()?;
    Ok(config)
}

pub async fn get_async(kvs: &AsyncKVDb) -> Result<FleetConfig, ConfigError> {
    let config: FleetConfig = kvs.get(keys::CONFIG).await?.ok_or(ConfigError::NotFound)?;
    config.validate()?;
    Ok(config)
}

pub fn set(kvs: &KVDb, config: &FleetConfig) -> Result<(), KVStoreError> {
    kvs.set(keys::CONFIG, config)
}
