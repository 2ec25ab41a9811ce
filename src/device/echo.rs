//! In-process transport standing in for real devices during development
//!
//! Each queued command is answered with a JSON status object carrying random
//! values for every key of the protocol's schema. Once the queue drains the
//! session reports the command set as terminated.
use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;

use crate::node_mgmt::DeviceDescriptor;

use super::json_protocol::JsonProtocol;
use super::session::{
    CommandAction, CommandRequest, CommandSet, ConnectionEvent, DeviceSession, ProtocolAdapter,
    RawData, SessionError, SessionErrorKind, SessionEvent, SessionFactory, SessionMessage,
    Transport,
};

#[derive(Default)]
struct EchoQueue {
    pending: VecDeque<CommandRequest>,
    current: Option<CommandRequest>,
}

pub struct EchoTransport {
    device_id: String,
    schema: Vec<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    queue: Mutex<EchoQueue>,
}

impl EchoTransport {
    fn new(device_id: String, schema: Vec<String>, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            device_id,
            schema,
            events,
            queue: Mutex::new(EchoQueue::default()),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("[{}] echo session has no listener", self.device_id);
        }
    }

    fn respond(&self, command: &CommandRequest) {
        let mut rng = rand::thread_rng();
        let body: serde_json::Map<String, serde_json::Value> = self
            .schema
            .iter()
            .map(|key| {
                let value = (rng.gen_range(0.0..100.0_f64) * 10.0).round() / 10.0;
                (key.clone(), serde_json::json!(value))
            })
            .collect();
        self.emit(SessionEvent::Data(RawData {
            command: Some(command.name.clone()),
            data: serde_json::Value::Object(body).to_string().into_bytes(),
        }));
    }

    fn advance(&self) {
        let next = {
            let mut queue = self.queue.lock();
            queue.current = queue.pending.pop_front();
            queue.current.clone()
        };
        match next {
            Some(command) => self.respond(&command),
            None => self.emit(SessionEvent::Message(SessionMessage::CommandSetTerminated)),
        }
    }
}

impl Transport for EchoTransport {
    fn execute(&self, commands: CommandSet) -> Result<(), SessionError> {
        let idle = {
            let mut queue = self.queue.lock();
            queue.pending.extend(commands.commands);
            queue.current.is_none()
        };
        if idle {
            self.emit(SessionEvent::Message(SessionMessage::CommandSetStarted));
            self.advance();
        }
        Ok(())
    }

    fn request_action(&self, action: CommandAction) {
        match action {
            CommandAction::Next => self.advance(),
            CommandAction::Done => {
                self.queue.lock().pending.clear();
                self.advance();
            }
            CommandAction::Retry => {
                let current = self.queue.lock().current.clone();
                if let Some(command) = current {
                    self.respond(&command);
                }
            }
            CommandAction::Wait => {}
        }
    }

    fn reconnect(&self) -> Result<(), SessionError> {
        self.emit(SessionEvent::Connection(ConnectionEvent::Connected));
        Ok(())
    }
}

pub struct EchoSessionFactory;

impl SessionFactory for EchoSessionFactory {
    fn bind(&self, descriptor: &DeviceDescriptor) -> Result<DeviceSession, SessionError> {
        let protocol = JsonProtocol::from_info(&descriptor.protocol)
            .map_err(|e| SessionError::new(SessionErrorKind::Rejected, e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = EchoTransport::new(descriptor.id.clone(), protocol.base_schema(), tx);
        log::info!(
            "[{}] bound to echo transport ({:?})",
            descriptor.id,
            descriptor.connection
        );
        transport.emit(SessionEvent::Connection(ConnectionEvent::Connected));

        Ok(DeviceSession {
            transport: Box::new(transport),
            protocol: Box::new(protocol),
            events: rx,
        })
    }
}
