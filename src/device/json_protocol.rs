//! Protocol adapter for devices that answer with JSON status objects
//!
//! Responses may arrive split over several frames; bytes accumulate in a
//! tracking buffer until they form a complete object.
use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::node_mgmt::config::ProtocolInfo;

use super::record::RtValue;
use super::session::{
    CommandRequest, CommandTemplate, ParsedResponse, ProtocolAdapter, ProtocolError, RawData,
    ResponseCode,
};

pub const ESS_CATEGORY: &str = "ess";

/// Canonical keys of an ESS/PCS inverter record
pub const ESS_BASE_KEYS: &[&str] = &[
    "pvAmp",
    "pvVol",
    "pvKw",
    "gridRAmp",
    "gridRsVol",
    "powerGridKw",
    "powerTotalKwh",
    "operIsError",
    "operMode",
    "operStatus",
    "batteryVol",
    "batteryAmp",
    "batteryChargingKw",
    "batteryDischargingKw",
    "batteryTotalChargingKw",
    "batteryTotalDischargingKw",
    "ledDcVol",
    "ledDcAmp",
    "ledUsingKw",
    "ledTotalUsingKwh",
    "inputLineKw",
    "inputLineTotalKwh",
];

const TROUBLES_KEY: &str = "troubles";

/// Largest response the tracking buffer holds before the frame is dropped
pub const MAX_TRACKING_BUFFER: usize = 64 * 1024;

pub struct JsonProtocol {
    device_id: String,
    schema: Vec<String>,
    tracking_buffer: Mutex<Vec<u8>>,
}

impl JsonProtocol {
    /// `options.schema` (array of strings) replaces the category's base keys
    pub fn from_info(info: &ProtocolInfo) -> Result<Self, ProtocolError> {
        let schema = match info.options.get("schema") {
            Some(Value::Array(keys)) => keys
                .iter()
                .map(|k| {
                    k.as_str().map(String::from).ok_or_else(|| {
                        ProtocolError::InvalidOptions(format!("schema key {k} is not a string"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ProtocolError::InvalidOptions(format!(
                    "schema must be an array, got {other}"
                )))
            }
            None if info.category == ESS_CATEGORY => {
                ESS_BASE_KEYS.iter().map(|k| k.to_string()).collect()
            }
            None => return Err(ProtocolError::UnsupportedCategory(info.category.clone())),
        };

        Ok(Self {
            device_id: info.device_id.clone(),
            schema,
            tracking_buffer: Mutex::new(Vec::new()),
        })
    }

    fn command(&self, name: &str) -> CommandRequest {
        let payload = serde_json::json!({ "cmd": name, "deviceId": self.device_id });
        CommandRequest {
            name: name.to_string(),
            payload: payload.to_string().into_bytes(),
        }
    }
}

impl ProtocolAdapter for JsonProtocol {
    fn base_schema(&self) -> Vec<String> {
        self.schema.clone()
    }

    fn build_command(&self, template: &CommandTemplate) -> Result<Vec<CommandRequest>, ProtocolError> {
        match template {
            CommandTemplate::Status => Ok(vec![self.command("status")]),
            CommandTemplate::Custom(name) if !name.is_empty() => Ok(vec![self.command(name)]),
            CommandTemplate::Custom(name) => Err(ProtocolError::UnknownTemplate(
                String::from("json"),
                name.clone(),
            )),
        }
    }

    fn parse(&self, data: &RawData) -> ParsedResponse {
        let mut buffer = self.tracking_buffer.lock();
        buffer.extend_from_slice(&data.data);

        let value = match serde_json::from_slice::<Value>(&buffer) {
            Ok(value) => value,
            Err(e) if e.is_eof() && buffer.len() <= MAX_TRACKING_BUFFER => {
                return ParsedResponse::with_fields(ResponseCode::Wait, BTreeMap::new())
            }
            Err(e) if e.is_eof() => {
                let size = buffer.len();
                buffer.clear();
                return ParsedResponse::error(format!(
                    "unterminated response exceeds {MAX_TRACKING_BUFFER} bytes ({size} buffered)"
                ));
            }
            Err(e) => {
                buffer.clear();
                return ParsedResponse::error(e.to_string());
            }
        };
        buffer.clear();

        let Value::Object(mut object) = value else {
            return ParsedResponse::error("response is not a JSON object");
        };

        let troubles = match object.remove(TROUBLES_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|t| t.as_str().map(String::from).unwrap_or_else(|| t.to_string()))
                .collect(),
            _ => Vec::new(),
        };
        let fields = object
            .iter()
            .map(|(k, v)| (k.clone(), RtValue::from(v)))
            .collect();

        ParsedResponse {
            code: ResponseCode::Next,
            fields,
            troubles,
            detail: None,
        }
    }

    fn reset_tracking_buffer(&self) {
        self.tracking_buffer.lock().clear();
    }
}
