//! Per-device command/response state machine
//!
//! A controller owns one transport session, one protocol adapter and the
//! device's [`DataRecord`]. It turns session events into record updates and
//! observer signals. No error is fatal to it: every terminal condition of an
//! ordered command set ends in exactly one `data_ready` dispatch.
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::defaults;
use crate::node_mgmt::config::SharedDescriptor;

use super::error::{ControllerError, ErrorEntry};
use super::observer::{DeviceObserver, ObserverList};
use super::record::{DataRecord, RtValue};
use super::session::{
    CommandAction, CommandRequest, CommandSet, CommandTemplate, DeviceSession, ProtocolAdapter,
    RawData, ResponseCode, SessionError, SessionEvent, SessionMessage, Transport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    CommandSent,
    ErrorRecoverable,
    Completed,
    Disconnected,
}

impl ControllerState {
    /// A command set is outstanding and has not produced its completion signal yet
    pub fn in_flight(self) -> bool {
        matches!(
            self,
            ControllerState::CommandSent | ControllerState::ErrorRecoverable
        )
    }
}

/// What a session event led the controller to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Merged { updated: usize, action: CommandAction },
    Retrying { attempt: u32 },
    RetriesExhausted,
    Skipped,
    Completed,
    Disconnected { round_closed: bool },
    Ignored,
}

/// Read-only view of a controller
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    pub id: String,
    pub config: SharedDescriptor,
    pub data: DataRecord,
    pub errors: Vec<ErrorEntry>,
    pub troubles: Vec<String>,
    pub measured_at: DateTime<Utc>,
    /// Time of the last successful parse
    pub updated_at: Option<DateTime<Utc>>,
}

struct ControllerInner {
    state: ControllerState,
    record: DataRecord,
    errors: VecDeque<ErrorEntry>,
    troubles: Vec<String>,
    last_commands: Option<CommandSet>,
    parse_failures: u32,
    updated_at: Option<DateTime<Utc>>,
}

pub struct DeviceController {
    descriptor: SharedDescriptor,
    transport: Box<dyn Transport>,
    protocol: Box<dyn ProtocolAdapter>,
    observers: ObserverList,
    inner: Mutex<ControllerInner>,
}

impl DeviceController {
    pub fn new(
        descriptor: SharedDescriptor,
        transport: Box<dyn Transport>,
        protocol: Box<dyn ProtocolAdapter>,
    ) -> Self {
        let record = DataRecord::with_schema(protocol.base_schema());
        Self {
            descriptor,
            transport,
            protocol,
            observers: ObserverList::new(),
            inner: Mutex::new(ControllerInner {
                state: ControllerState::Idle,
                record,
                errors: VecDeque::new(),
                troubles: Vec::new(),
                last_commands: None,
                parse_failures: 0,
                updated_at: None,
            }),
        }
    }

    /// Build a controller from a bound session and start consuming its events
    pub fn spawn(descriptor: SharedDescriptor, session: DeviceSession) -> (Arc<Self>, JoinHandle<()>) {
        let DeviceSession {
            transport,
            protocol,
            events,
        } = session;
        let controller = Arc::new(Self::new(descriptor, transport, protocol));
        let handle = controller.spawn_event_loop(events);
        (controller, handle)
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &SharedDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    pub fn attach(&self, observer: Weak<dyn DeviceObserver>) {
        self.observers.attach(observer);
    }

    pub fn read(&self, key: &str) -> Option<RtValue> {
        self.inner.lock().record.read(key).cloned()
    }

    pub fn record(&self) -> DataRecord {
        self.inner.lock().record.clone()
    }

    pub fn last_command_set(&self) -> Option<CommandSet> {
        self.inner.lock().last_commands.clone()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let inner = self.inner.lock();
        DeviceSnapshot {
            id: self.descriptor.id.clone(),
            config: self.descriptor.clone(),
            data: inner.record.clone(),
            errors: inner.errors.iter().cloned().collect(),
            troubles: inner.troubles.clone(),
            measured_at: Utc::now(),
            updated_at: inner.updated_at,
        }
    }

    /// Ask the protocol for the commands behind `template` and submit them
    pub fn order_template(&self, template: &CommandTemplate) -> Result<usize, ControllerError> {
        match self.protocol.build_command(template) {
            Ok(requests) => self.order_operation(requests),
            Err(e) => Err(self.abandon_order(e.into())),
        }
    }

    /// Submit `requests` as one command set; returns the number of commands queued
    ///
    /// If the set cannot be built or submitted, the round is reported complete
    /// for this device right away and the error is handed back to the caller.
    pub fn order_operation(&self, requests: Vec<CommandRequest>) -> Result<usize, ControllerError> {
        if requests.is_empty() {
            return Err(self.abandon_order(ControllerError::CommandConstruction(
                String::from("command set is empty"),
            )));
        }
        let command_set = CommandSet {
            command_id: self.id().to_string(),
            commands: requests,
        };
        let count = command_set.commands.len();
        {
            let mut inner = self.inner.lock();
            if inner.state.in_flight() {
                log::warn!(
                    "[{}] ordering a new command set while the previous one is still outstanding",
                    self.id()
                );
            }
            inner.state = ControllerState::CommandSent;
            inner.parse_failures = 0;
            inner.last_commands = Some(command_set.clone());
        }

        if self.descriptor.log_options.transfer_command {
            let names: Vec<&str> = command_set.commands.iter().map(|c| c.name.as_str()).collect();
            log::debug!("[{}] submitting commands {:?}", self.id(), names);
        }

        match self.transport.execute(command_set) {
            Ok(()) => Ok(count),
            Err(e) => Err(self.abandon_order(ControllerError::CommandConstruction(format!(
                "transport rejected command set: {e}"
            )))),
        }
    }

    fn abandon_order(&self, error: ControllerError) -> ControllerError {
        log::error!(
            "[{}] {}; reporting round complete with current data",
            self.id(),
            error
        );
        {
            let mut inner = self.inner.lock();
            push_error(&mut inner.errors, ErrorEntry::from(&error));
            inner.state = ControllerState::CommandSent;
        }
        self.finish(ControllerState::Completed);
        error
    }

    pub fn handle_event(&self, event: SessionEvent) -> EventOutcome {
        match event {
            SessionEvent::Data(raw) => self.on_response_data(raw),
            SessionEvent::Error(error) => self.on_session_error(error),
            SessionEvent::Message(message) => self.on_session_message(message),
            SessionEvent::Connection(event) => {
                if self.descriptor.log_options.session_event {
                    log::info!("[{}] connection event: {:?}", self.id(), event);
                }
                EventOutcome::Ignored
            }
        }
    }

    pub fn on_response_data(&self, raw: RawData) -> EventOutcome {
        if self.descriptor.log_options.receive_data {
            log::debug!(
                "[{}] received {:?}: {}",
                self.id(),
                raw.command,
                String::from_utf8_lossy(&raw.data)
            );
        }

        let parsed = self.protocol.parse(&raw);
        if parsed.code == ResponseCode::Error {
            let detail = parsed
                .detail
                .unwrap_or_else(|| String::from("unparseable response"));
            return self.on_parse_error(detail);
        }

        let updated = {
            let mut inner = self.inner.lock();
            inner.parse_failures = 0;
            if inner.state == ControllerState::ErrorRecoverable {
                inner.state = ControllerState::CommandSent;
            }
            if !parsed.fields.is_empty() {
                inner.troubles = parsed.troubles;
                inner.updated_at = Some(Utc::now());
            }
            inner.record.merge(parsed.fields)
        };

        let action = parsed.code.action();
        if self.descriptor.log_options.commander_response {
            log::debug!(
                "[{}] {} field(s) updated; requesting {:?}",
                self.id(),
                updated,
                action
            );
        }
        self.transport.request_action(action);
        EventOutcome::Merged { updated, action }
    }

    fn on_parse_error(&self, detail: String) -> EventOutcome {
        let max_retries = self.descriptor.control_policy.max_parse_retries;
        let attempt = {
            let mut inner = self.inner.lock();
            inner.parse_failures += 1;
            if inner.state.in_flight() {
                inner.state = ControllerState::ErrorRecoverable;
            }
            inner.parse_failures
        };
        let error = ControllerError::Parse { detail, attempt };
        log::warn!("[{}] {}", self.id(), error);
        self.protocol.reset_tracking_buffer();

        let outcome = if attempt <= max_retries {
            self.transport.request_action(CommandAction::Retry);
            EventOutcome::Retrying { attempt }
        } else {
            log::error!(
                "[{}] giving up on current command after {} parse failure(s)",
                self.id(),
                attempt
            );
            self.inner.lock().parse_failures = 0;
            self.transport.request_action(CommandAction::Next);
            EventOutcome::RetriesExhausted
        };
        self.notify_error(&error);
        outcome
    }

    pub fn on_session_error(&self, error: SessionError) -> EventOutcome {
        self.protocol.reset_tracking_buffer();
        if self.descriptor.log_options.session_error {
            log::warn!("[{}] session error: {}", self.id(), error);
        }

        if error.is_disconnect() {
            // The round ends here for this device; observers still see the error
            let error = ControllerError::Disconnected(error);
            self.record_error(&error);
            let round_closed = self.finish(ControllerState::Disconnected);
            self.dispatch_error(&error);
            if self.descriptor.control_policy.reconnect_on_disconnect {
                if let Err(e) = self.transport.reconnect() {
                    log::error!("[{}] reconnect failed: {}", self.id(), e);
                }
            }
            return EventOutcome::Disconnected { round_closed };
        }

        {
            let mut inner = self.inner.lock();
            if inner.state.in_flight() {
                inner.state = ControllerState::ErrorRecoverable;
            }
        }
        if self.descriptor.control_policy.error_handling {
            self.transport.request_action(CommandAction::Next);
        }
        self.notify_error(&ControllerError::Unhandled(error));
        EventOutcome::Skipped
    }

    pub fn on_session_message(&self, message: SessionMessage) -> EventOutcome {
        if self.descriptor.log_options.session_message {
            log::debug!("[{}] session message: {:?}", self.id(), message);
        }
        match message {
            SessionMessage::CommandSetTerminated => {
                if self.finish(ControllerState::Completed) {
                    EventOutcome::Completed
                } else {
                    EventOutcome::Ignored
                }
            }
            _ => EventOutcome::Ignored,
        }
    }

    /// Abandon the outstanding command set after the round deadline passed
    pub fn mark_timed_out(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = ControllerState::Idle;
            inner.parse_failures = 0;
        }
        self.protocol.reset_tracking_buffer();
        self.notify_error(&ControllerError::Timeout);
    }

    /// Emit `data_ready` if a command set is outstanding; returns whether it fired
    fn finish(&self, terminal: ControllerState) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.state.in_flight() {
                return false;
            }
            inner.state = terminal;
        }

        self.observers
            .dispatch(self.id(), "data_ready", |o| o.data_ready(self));

        let mut inner = self.inner.lock();
        if inner.state == terminal {
            inner.state = ControllerState::Idle;
        }
        true
    }

    fn notify_error(&self, error: &ControllerError) {
        self.record_error(error);
        self.dispatch_error(error);
    }

    fn record_error(&self, error: &ControllerError) {
        push_error(&mut self.inner.lock().errors, ErrorEntry::from(error));
    }

    fn dispatch_error(&self, error: &ControllerError) {
        self.observers
            .dispatch(self.id(), "error_occurred", |o| o.error_occurred(self, error));
    }

    fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
        // Weak, so a session holding the sender cannot keep its own controller alive
        let controller = Arc::downgrade(self);
        let device_id = self.id().to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                let outcome = controller.handle_event(event);
                log::trace!("[{}] event outcome: {:?}", device_id, outcome);
            }
            log::debug!("[{}] session event stream closed", device_id);
        })
    }
}

fn push_error(errors: &mut VecDeque<ErrorEntry>, entry: ErrorEntry) {
    if errors.len() == defaults::MAX_ERROR_ENTRIES {
        errors.pop_front();
    }
    errors.push_back(entry);
}
