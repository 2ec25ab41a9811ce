//! Listener contract for device controllers
//!
//! Both callbacks default to no-ops, so an observer implements only the
//! signals it cares about. Observers are held weakly: a dropped observer is
//! silently skipped on the next dispatch.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::controller::DeviceController;
use super::error::ControllerError;

pub trait DeviceObserver: Send + Sync {
    /// The device finished its part of the current round (success or terminal failure)
    fn data_ready(&self, _device: &DeviceController) {}

    /// Any controller-level error, whether or not `data_ready` fires for the same event
    fn error_occurred(&self, _device: &DeviceController, _error: &ControllerError) {}
}

type DataReadyFn = Box<dyn Fn(&DeviceController) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&DeviceController, &ControllerError) + Send + Sync>;

/// Observer assembled from closures; only the provided slots are ever invoked
#[derive(Default)]
pub struct CallbackObserver {
    on_data_ready: Option<DataReadyFn>,
    on_error: Option<ErrorFn>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data_ready(mut self, f: impl Fn(&DeviceController) + Send + Sync + 'static) -> Self {
        self.on_data_ready = Some(Box::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&DeviceController, &ControllerError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl DeviceObserver for CallbackObserver {
    fn data_ready(&self, device: &DeviceController) {
        if let Some(f) = &self.on_data_ready {
            f(device)
        }
    }

    fn error_occurred(&self, device: &DeviceController, error: &ControllerError) {
        if let Some(f) = &self.on_error {
            f(device, error)
        }
    }
}

#[derive(Default)]
pub struct ObserverList {
    observers: Mutex<Vec<Weak<dyn DeviceObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append without deduplication
    pub fn attach(&self, observer: Weak<dyn DeviceObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<Arc<dyn DeviceObserver>> {
        // Upgrade under the lock, call outside it, so observers may re-enter the controller
        self.observers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Invoke `f` on every live observer; returns how many calls completed without panicking
    pub fn dispatch<F>(&self, device_id: &str, signal: &str, f: F) -> usize
    where
        F: Fn(&dyn DeviceObserver),
    {
        let mut delivered = 0;
        for observer in self.live() {
            match catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!(
                    "[{}] observer panicked while handling {}; continuing with the rest",
                    device_id,
                    signal
                ),
            }
        }
        delivered
    }
}
