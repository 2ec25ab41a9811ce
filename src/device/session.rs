//! Capabilities a device controller is built on
//!
//! Byte-level encoding lives behind [`ProtocolAdapter`] and physical I/O behind
//! [`Transport`]. A [`SessionFactory`] binds both to a descriptor and hands the
//! controller the channel its session events arrive on.
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::node_mgmt::DeviceDescriptor;

use super::record::RtValue;

/// Abstract operation a caller asks a device to perform
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTemplate {
    Status,
    Custom(String),
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTemplate::Status => write!(f, "STATUS"),
            CommandTemplate::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// One protocol-level command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Ordered commands submitted to a session as a unit, keyed by device id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSet {
    pub command_id: String,
    pub commands: Vec<CommandRequest>,
}

/// What the session should do with the command it is currently executing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandAction {
    /// Move on to the next queued command
    Next,
    /// Re-send the current command
    Retry,
    /// Keep waiting for more data for the current command
    Wait,
    /// The command set is finished
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Error,
    Wait,
    Next,
    Done,
}

impl ResponseCode {
    /// Action recommended after a successful parse
    pub fn action(self) -> CommandAction {
        match self {
            ResponseCode::Error => CommandAction::Retry,
            ResponseCode::Wait => CommandAction::Wait,
            ResponseCode::Next => CommandAction::Next,
            ResponseCode::Done => CommandAction::Done,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedResponse {
    pub code: ResponseCode,
    pub fields: BTreeMap<String, RtValue>,
    pub troubles: Vec<String>,
    pub detail: Option<String>,
}

impl ParsedResponse {
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Error,
            fields: BTreeMap::new(),
            troubles: Vec::new(),
            detail: Some(detail.into()),
        }
    }

    pub fn with_fields(code: ResponseCode, fields: BTreeMap<String, RtValue>) -> Self {
        Self {
            code,
            fields,
            troubles: Vec::new(),
            detail: None,
        }
    }
}

/// Raw bytes received from the device in answer to `command`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawData {
    pub command: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionErrorKind {
    Disconnected,
    Timeout,
    Rejected,
    Transport,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Disconnected, message)
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == SessionErrorKind::Disconnected
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionMessage {
    CommandSetStarted,
    /// Every command of the current set has been executed (or dropped)
    CommandSetTerminated,
    CommandSetDeleted,
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Data(RawData),
    Error(SessionError),
    Message(SessionMessage),
    Connection(ConnectionEvent),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("protocol '{0}' has no command for template '{1}'")]
    UnknownTemplate(String, String),
    #[error("unsupported protocol category '{0}'")]
    UnsupportedCategory(String),
    #[error("invalid protocol options: {0}")]
    InvalidOptions(String),
}

pub trait Transport: Send + Sync {
    /// Queue a command set for execution; must not block on device I/O
    fn execute(&self, commands: CommandSet) -> Result<(), SessionError>;

    fn request_action(&self, action: CommandAction);

    fn reconnect(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

pub trait ProtocolAdapter: Send + Sync {
    /// Keys of the canonical data record for this protocol
    fn base_schema(&self) -> Vec<String>;

    fn build_command(&self, template: &CommandTemplate) -> Result<Vec<CommandRequest>, ProtocolError>;

    fn parse(&self, data: &RawData) -> ParsedResponse;

    /// Drop any partially accumulated response
    fn reset_tracking_buffer(&self);
}

pub struct DeviceSession {
    pub transport: Box<dyn Transport>,
    pub protocol: Box<dyn ProtocolAdapter>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

pub trait SessionFactory: Send + Sync {
    fn bind(&self, descriptor: &DeviceDescriptor) -> Result<DeviceSession, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_actions() {
        assert_eq!(ResponseCode::Error.action(), CommandAction::Retry);
        assert_eq!(ResponseCode::Next.action(), CommandAction::Next);
        assert_eq!(ResponseCode::Done.action(), CommandAction::Done);
        assert_eq!(ResponseCode::Wait.action(), CommandAction::Wait);
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::disconnected("socket closed");
        assert!(err.is_disconnect());
        assert_eq!(err.to_string(), "Disconnected: socket closed");
    }
}
