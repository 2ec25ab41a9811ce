pub mod controller;
#[cfg(feature = "dev-echo")]
pub mod echo;
pub mod error;
pub mod json_protocol;
pub mod observer;
pub mod record;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use controller::{ControllerState, DeviceController, DeviceSnapshot, EventOutcome};
pub use error::{ControllerError, ErrorEntry};
pub use observer::{CallbackObserver, DeviceObserver};
pub use record::{DataRecord, RtValue};
pub use session::{
    CommandAction, CommandRequest, CommandSet, CommandTemplate, DeviceSession, ProtocolAdapter,
    SessionError, SessionEvent, SessionFactory, Transport,
};
