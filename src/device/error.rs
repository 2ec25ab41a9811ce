use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::session::{ProtocolError, SessionError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("could not parse device response (attempt {attempt}): {detail}")]
    Parse { detail: String, attempt: u32 },
    #[error("device disconnected: {0}")]
    Disconnected(SessionError),
    #[error("could not build command set: {0}")]
    CommandConstruction(String),
    #[error("unhandled session error: {0}")]
    Unhandled(SessionError),
    #[error("device did not report before the round deadline")]
    Timeout,
}

impl ControllerError {
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::Parse { .. } => "parse_error",
            ControllerError::Disconnected(_) => "disconnected",
            ControllerError::CommandConstruction(_) => "command_construction",
            ControllerError::Unhandled(_) => "unhandled",
            ControllerError::Timeout => "timeout",
        }
    }
}

impl From<ProtocolError> for ControllerError {
    fn from(e: ProtocolError) -> Self {
        ControllerError::CommandConstruction(e.to_string())
    }
}

/// Entry in a controller's error history
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<&ControllerError> for ErrorEntry {
    fn from(e: &ControllerError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            occurred_at: Utc::now(),
        }
    }
}
