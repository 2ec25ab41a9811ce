use std::time::Duration;

pub const LOG_LEVEL: &str = "info";
pub const CATEGORY: &str = "PCS";

pub const ROUND_INTERVAL: Duration = Duration::from_secs(60);
pub const STARTUP_DELAY: Duration = Duration::from_secs(5);
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(50);
pub const MAX_PARSE_RETRIES: u32 = 3;
// Per-device error history kept for snapshots
pub const MAX_ERROR_ENTRIES: usize = 20;

pub const MQTT_BRIDGE_HOST: &str = "localhost";
pub const MQTT_BRIDGE_PORT: u16 = 1883;
