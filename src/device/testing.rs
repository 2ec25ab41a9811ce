//! Fakes shared by the unit tests of the device layer
use std::sync::Arc;

use parking_lot::Mutex;

use crate::node_mgmt::config::{
    ConnectionInfo, ControlPolicy, DeviceDescriptor, LogOptions, ProtocolInfo, SharedDescriptor,
};

use super::controller::DeviceController;
use super::error::ControllerError;
use super::observer::DeviceObserver;
use super::record::RtValue;
use super::session::{
    CommandAction, CommandRequest, CommandSet, CommandTemplate, ParsedResponse, ProtocolAdapter,
    ProtocolError, RawData, ResponseCode, SessionError, SessionErrorKind, Transport,
};

#[derive(Default, Debug)]
pub struct TransportLog {
    pub executed: Vec<CommandSet>,
    pub actions: Vec<CommandAction>,
    pub reconnects: usize,
}

pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
    pub reject_execute: bool,
}

impl Transport for FakeTransport {
    fn execute(&self, commands: CommandSet) -> Result<(), SessionError> {
        if self.reject_execute {
            return Err(SessionError::new(SessionErrorKind::Rejected, "queue full"));
        }
        self.log.lock().executed.push(commands);
        Ok(())
    }

    fn request_action(&self, action: CommandAction) {
        self.log.lock().actions.push(action);
    }

    fn reconnect(&self) -> Result<(), SessionError> {
        self.log.lock().reconnects += 1;
        Ok(())
    }
}

/// Parses JSON objects; the literal payload `ERR` is a malformed frame
pub struct FakeProtocol;

impl ProtocolAdapter for FakeProtocol {
    fn base_schema(&self) -> Vec<String> {
        vec![
            String::from("power"),
            String::from("batteryVoltage"),
            String::from("operMode"),
        ]
    }

    fn build_command(&self, template: &CommandTemplate) -> Result<Vec<CommandRequest>, ProtocolError> {
        match template {
            CommandTemplate::Status => Ok(vec![CommandRequest {
                name: String::from("status"),
                payload: b"ST".to_vec(),
            }]),
            CommandTemplate::Custom(name) => Err(ProtocolError::UnknownTemplate(
                String::from("fake"),
                name.clone(),
            )),
        }
    }

    fn parse(&self, data: &RawData) -> ParsedResponse {
        if data.data == b"ERR" {
            return ParsedResponse::error("bad frame");
        }
        match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&data.data) {
            Ok(map) => ParsedResponse::with_fields(
                ResponseCode::Next,
                map.iter().map(|(k, v)| (k.clone(), RtValue::from(v))).collect(),
            ),
            Err(e) => ParsedResponse::error(e.to_string()),
        }
    }

    fn reset_tracking_buffer(&self) {}
}

pub fn descriptor(id: &str) -> SharedDescriptor {
    Arc::new(DeviceDescriptor {
        id: id.to_string(),
        name: format!("Inverter {id}"),
        category: String::from("inverter"),
        log_options: LogOptions::default(),
        control_policy: ControlPolicy::default(),
        protocol: ProtocolInfo {
            category: String::from("ess"),
            sub_category: String::from("das_pv_led"),
            device_id: String::from("001"),
            options: Default::default(),
        },
        connection: ConnectionInfo::Socket {
            address: String::from("localhost"),
            port: 9000,
        },
    })
}

pub fn controller_with(
    descriptor: SharedDescriptor,
    reject_execute: bool,
) -> (Arc<DeviceController>, Arc<Mutex<TransportLog>>) {
    let log = Arc::new(Mutex::new(TransportLog::default()));
    let transport = FakeTransport {
        log: log.clone(),
        reject_execute,
    };
    let controller = DeviceController::new(descriptor, Box::new(transport), Box::new(FakeProtocol));
    (Arc::new(controller), log)
}

pub fn controller(id: &str) -> (Arc<DeviceController>, Arc<Mutex<TransportLog>>) {
    controller_with(descriptor(id), false)
}

#[derive(Default)]
pub struct Recorder {
    pub data_ready: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, &'static str)>>,
}

impl DeviceObserver for Recorder {
    fn data_ready(&self, device: &DeviceController) {
        self.data_ready.lock().push(device.id().to_string());
    }

    fn error_occurred(&self, device: &DeviceController, error: &ControllerError) {
        self.errors.lock().push((device.id().to_string(), error.code()));
    }
}

pub fn attach_recorder(controller: &DeviceController) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn DeviceObserver> = recorder.clone();
    controller.attach(Arc::downgrade(&observer));
    recorder
}

pub fn json(raw: &str) -> RawData {
    RawData {
        command: Some(String::from("status")),
        data: raw.as_bytes().to_vec(),
    }
}
