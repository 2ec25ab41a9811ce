//! Session factory whose events are pushed by the test itself
use std::collections::HashMap;
use std::sync::Arc;

use fleet_poller::device::session::{
    CommandAction, CommandRequest, CommandSet, CommandTemplate, DeviceSession, ParsedResponse,
    ProtocolAdapter, ProtocolError, RawData, ResponseCode, SessionError, SessionEvent,
    SessionFactory, SessionMessage, Transport,
};
use fleet_poller::device::RtValue;
use fleet_poller::node_mgmt::DeviceDescriptor;
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct SessionLog {
    pub executed: Vec<CommandSet>,
    pub actions: Vec<CommandAction>,
}

struct StubTransport {
    log: Arc<Mutex<SessionLog>>,
}

impl Transport for StubTransport {
    fn execute(&self, commands: CommandSet) -> Result<(), SessionError> {
        self.log.lock().executed.push(commands);
        Ok(())
    }

    fn request_action(&self, action: CommandAction) {
        self.log.lock().actions.push(action);
    }
}

/// Parses JSON objects over a three-key schema
struct StubProtocol;

impl ProtocolAdapter for StubProtocol {
    fn base_schema(&self) -> Vec<String> {
        ["power", "batteryVoltage", "operMode"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    fn build_command(&self, template: &CommandTemplate) -> Result<Vec<CommandRequest>, ProtocolError> {
        match template {
            CommandTemplate::Status => Ok(vec![CommandRequest {
                name: String::from("status"),
                payload: b"ST".to_vec(),
            }]),
            other => Err(ProtocolError::UnknownTemplate(String::from("stub"), other.to_string())),
        }
    }

    fn parse(&self, data: &RawData) -> ParsedResponse {
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

struct Bound {
    log: Arc<Mutex<SessionLog>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
pub struct ScriptedFactory {
    sessions: Mutex<HashMap<String, Bound>>,
}

impl ScriptedFactory {
    pub fn send(&self, id: &str, event: SessionEvent) {
        let sessions = self.sessions.lock();
        sessions[id].events.send(event).unwrap();
    }

    pub fn respond(&self, id: &str, json: &str) {
        self.send(
            id,
            SessionEvent::Data(RawData {
                command: Some(String::from("status")),
                data: json.as_bytes().to_vec(),
            }),
        );
    }

    pub fn terminate(&self, id: &str) {
        self.send(id, SessionEvent::Message(SessionMessage::CommandSetTerminated));
    }

    pub fn executed(&self, id: &str) -> Vec<CommandSet> {
        self.sessions.lock()[id].log.lock().executed.clone()
    }

    pub fn actions(&self, id: &str) -> Vec<CommandAction> {
        self.sessions.lock()[id].log.lock().actions.clone()
    }
}

impl SessionFactory for ScriptedFactory {
    fn bind(&self, descriptor: &DeviceDescriptor) -> Result<DeviceSession, SessionError> {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().insert(
            descriptor.id.clone(),
            Bound {
                log: log.clone(),
                events: tx,
            },
        );
        Ok(DeviceSession {
            transport: Box::new(StubTransport { log }),
            protocol: Box::new(StubProtocol),
            events: rx,
        })
    }
}
