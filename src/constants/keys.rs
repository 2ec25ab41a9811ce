pub const CONFIG: &str = "config";
// Descriptor rows per category live under "devices/<category>"
pub const DEVICES_PFX: &str = "devices";

// Cache keys (stored in SQLITE_CACHE)
pub const LAST_ROUND: &str = "last_round";
pub const LAST_ROUND_TS: &str = "last_round_ts";
pub const LAST_REPORT_TS_FOR_DEV_PFX: &str = "last_report_ts_for_dev";
