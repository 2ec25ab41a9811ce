use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::{DataRecord, DeviceSnapshot, ErrorEntry, RtValue};
use crate::node_mgmt::config::FieldMapping;

use super::refine::refine_record;

/// Aggregate emitted exactly once when a round closes
#[derive(Clone, Debug)]
pub struct RoundFlush {
    pub round_id: u64,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    /// Latest snapshot of every device that reported or timed out so far
    pub devices: Vec<DeviceSnapshot>,
    /// Devices that completed this round, in arrival order
    pub reported: Vec<String>,
    pub timed_out: Vec<String>,
}

impl RoundFlush {
    pub fn device(&self, id: &str) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|d| d.id == id)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundPayload {
    pub t: i64,
    pub category: String,
    pub r: Vec<DeviceData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timed_out: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    pub d: String,
    pub name: String,
    pub measured_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    pub data: DataRecord,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub refined: BTreeMap<String, RtValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubles: Vec<String>,
    /// Errors recorded since the round started
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
}

pub fn payload_from_flush(flush: &RoundFlush, refined_fields: &[FieldMapping]) -> RoundPayload {
    RoundPayload {
        t: flush.timestamp.timestamp(),
        category: flush.category.clone(),
        r: flush
            .devices
            .iter()
            .map(|snapshot| device_data_from_snapshot(snapshot, flush.timestamp, refined_fields))
            .collect(),
        timed_out: flush.timed_out.clone(),
    }
}

fn device_data_from_snapshot(
    snapshot: &DeviceSnapshot,
    round_start: DateTime<Utc>,
    refined_fields: &[FieldMapping],
) -> DeviceData {
    DeviceData {
        d: snapshot.id.clone(),
        name: snapshot.config.name.clone(),
        measured_at: snapshot.measured_at.timestamp(),
        updated_at: snapshot.updated_at.map(|t| t.timestamp()),
        data: snapshot.data.clone(),
        refined: refine_record(&snapshot.data, refined_fields),
        troubles: snapshot.troubles.clone(),
        errors: snapshot
            .errors
            .iter()
            .filter(|e| e.occurred_at >= round_start)
            .cloned()
            .collect(),
    }
}
