//! Fleet-level round bookkeeping
//!
//! Every tick fans a STATUS request out to all controllers and opens a round
//! whose pending set starts as the full device list. Each `data_ready` removes
//! one device; when the set empties the round is flushed exactly once. A round
//! still open at its deadline, or when the next tick arrives, is force-closed
//! and its silent devices are reported as timed out.
use std::collections::BTreeMap;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{
    CommandTemplate, ControllerError, DeviceController, DeviceObserver, DeviceSnapshot,
    SessionFactory,
};
use crate::helpers::round_timestamp;
use crate::node_mgmt::config::{ScheduleConfig, SharedDescriptor};

use super::payload::RoundFlush;
use super::scheduler::{Scheduler, SchedulerError};

struct OpenRound {
    id: u64,
    timestamp: DateTime<Utc>,
    pending: Vec<Arc<DeviceController>>,
    reported: Vec<String>,
    deadline: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RoundState {
    current: Option<OpenRound>,
    aggregate: BTreeMap<String, DeviceSnapshot>,
}

pub struct FleetCoordinator {
    category: String,
    schedule: ScheduleConfig,
    controllers: Vec<Arc<DeviceController>>,
    event_loops: Vec<JoinHandle<()>>,
    scheduler: Scheduler,
    round: Mutex<RoundState>,
    next_round_id: AtomicU64,
    flush_tx: mpsc::UnboundedSender<RoundFlush>,
}

impl FleetCoordinator {
    /// Bind a session to every descriptor and attach the coordinator to each controller
    ///
    /// A descriptor whose session cannot be bound is logged and left out of the fleet.
    pub fn init(
        category: impl Into<String>,
        schedule: ScheduleConfig,
        descriptors: Vec<SharedDescriptor>,
        factory: &dyn SessionFactory,
        flush_tx: mpsc::UnboundedSender<RoundFlush>,
    ) -> Result<Arc<Self>, SchedulerError> {
        Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut controllers = Vec::with_capacity(descriptors.len());
        let mut event_loops = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match factory.bind(&descriptor) {
                Ok(session) => {
                    let (controller, event_loop) = DeviceController::spawn(descriptor, session);
                    controllers.push(controller);
                    event_loops.push(event_loop);
                }
                Err(e) => log::error!("[{}] could not bind device session: {}", descriptor.id, e),
            }
        }
        log::info!("Created {} device controllers", controllers.len());

        Ok(Self::build(category.into(), schedule, controllers, event_loops, flush_tx))
    }

    /// Coordinate already constructed controllers
    pub fn from_controllers(
        category: impl Into<String>,
        schedule: ScheduleConfig,
        controllers: Vec<Arc<DeviceController>>,
        flush_tx: mpsc::UnboundedSender<RoundFlush>,
    ) -> Arc<Self> {
        Self::build(category.into(), schedule, controllers, Vec::new(), flush_tx)
    }

    fn build(
        category: String,
        schedule: ScheduleConfig,
        controllers: Vec<Arc<DeviceController>>,
        event_loops: Vec<JoinHandle<()>>,
        flush_tx: mpsc::UnboundedSender<RoundFlush>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            category,
            schedule,
            controllers,
            event_loops,
            scheduler: Scheduler::new(),
            round: Mutex::new(RoundState::default()),
            next_round_id: AtomicU64::new(1),
            flush_tx,
        });
        let observer: Weak<dyn DeviceObserver> =
            Arc::downgrade(&coordinator) as Weak<FleetCoordinator>;
        for controller in &coordinator.controllers {
            controller.attach(observer.clone());
        }
        coordinator
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn controllers(&self) -> &[Arc<DeviceController>] {
        &self.controllers
    }

    pub fn controller(&self, id: &str) -> Option<&Arc<DeviceController>> {
        self.controllers.iter().find(|c| c.id() == id)
    }

    /// Wait out the startup delay, then start the round timer
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let delay = self.schedule.startup_delay();
        log::info!("Starting round timer in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
        self.schedule_rounds()
    }

    /// (Re)start the round timer; at most one timer is ever active
    pub fn schedule_rounds(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let coordinator = Arc::downgrade(self);
        self.scheduler.schedule_rounds(
            self.schedule.interval(),
            self.schedule.align_to_interval,
            move || {
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.run_round(round_timestamp());
                }
            },
        )
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_active()
    }

    /// Open a round tagged `timestamp` and order a STATUS read from every device
    ///
    /// Returns the round id. Fan-out does not wait for any device.
    pub fn run_round(self: &Arc<Self>, timestamp: DateTime<Utc>) -> u64 {
        let round_id = self.next_round_id.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "[round {round_id}] polling {} devices (t: {})",
            self.controllers.len(),
            timestamp.timestamp()
        );

        // Close the previous round before opening this one
        let previous = self.round.lock().current.take();
        if let Some(previous) = previous {
            log::warn!(
                "[round {}] still open when round {round_id} started",
                previous.id
            );
            self.expire(previous);
        }

        let round = OpenRound {
            id: round_id,
            timestamp,
            pending: self.controllers.clone(),
            reported: Vec::new(),
            deadline: None,
        };
        if round.pending.is_empty() {
            let flush = self.close(&mut self.round.lock(), round, Vec::new());
            self.emit(flush);
            return round_id;
        }
        self.round.lock().current = Some(round);

        self.arm_deadline(round_id);

        for controller in &self.controllers {
            if let Err(e) = controller.order_template(&CommandTemplate::Status) {
                log::warn!("[round {round_id}] [{}] status request failed: {}", controller.id(), e);
            }
        }
        round_id
    }

    fn arm_deadline(self: &Arc<Self>, round_id: u64) {
        let Some(timeout) = self.schedule.round_timeout() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            log::debug!("[round {round_id}] no runtime, round has no deadline");
            return;
        };
        let coordinator = Arc::downgrade(self);
        let deadline = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.expire_round(round_id);
            }
        });

        let mut state = self.round.lock();
        match state.current.as_mut() {
            Some(round) if round.id == round_id => round.deadline = Some(deadline),
            // Closed during fan-out already
            _ => deadline.abort(),
        }
    }

    /// Force-close round `round_id` if it is still open; returns whether it was
    pub fn expire_round(&self, round_id: u64) -> bool {
        let round = {
            let mut state = self.round.lock();
            match state.current.as_ref() {
                Some(round) if round.id == round_id => state.current.take(),
                _ => None,
            }
        };
        match round {
            Some(round) => {
                log::warn!(
                    "[round {round_id}] deadline passed with {} devices pending",
                    round.pending.len()
                );
                self.expire(round);
                true
            }
            None => false,
        }
    }

    fn expire(&self, mut round: OpenRound) {
        let silent = std::mem::take(&mut round.pending);
        // Controllers call back into the coordinator, so the round lock must not be held here
        for controller in &silent {
            controller.mark_timed_out();
        }
        let timed_out = silent.iter().map(|c| c.id().to_string()).collect();
        let flush = {
            let mut state = self.round.lock();
            for controller in &silent {
                state
                    .aggregate
                    .insert(controller.id().to_string(), controller.snapshot());
            }
            self.close(&mut state, round, timed_out)
        };
        self.emit(flush);
    }

    fn close(&self, state: &mut RoundState, mut round: OpenRound, timed_out: Vec<String>) -> RoundFlush {
        if let Some(deadline) = round.deadline.take() {
            deadline.abort();
        }
        RoundFlush {
            round_id: round.id,
            timestamp: round.timestamp,
            category: self.category.clone(),
            devices: state.aggregate.values().cloned().collect(),
            reported: round.reported,
            timed_out,
        }
    }

    fn emit(&self, flush: RoundFlush) {
        log::info!(
            "[round {}] closed: {} reported, {} timed out",
            flush.round_id,
            flush.reported.len(),
            flush.timed_out.len()
        );
        if self.flush_tx.send(flush).is_err() {
            log::error!("Round flush dropped, flush worker is gone");
        }
    }

    /// Id of the open round, if any
    pub fn current_round(&self) -> Option<u64> {
        self.round.lock().current.as_ref().map(|r| r.id)
    }

    /// Ids of devices the open round is still waiting for
    pub fn pending(&self) -> Vec<String> {
        self.round
            .lock()
            .current
            .as_ref()
            .map(|r| r.pending.iter().map(|c| c.id().to_string()).collect())
            .unwrap_or_default()
    }

    /// Last snapshot of `id` merged into the fleet view
    pub fn aggregate(&self, id: &str) -> Option<DeviceSnapshot> {
        self.round.lock().aggregate.get(id).cloned()
    }
}

impl DeviceObserver for FleetCoordinator {
    fn data_ready(&self, device: &DeviceController) {
        let snapshot = device.snapshot();
        let flush = {
            let mut state = self.round.lock();
            let Some(round) = state.current.as_mut() else {
                log::debug!("[{}] reported with no round open", device.id());
                return;
            };
            let Some(pos) = round
                .pending
                .iter()
                .position(|c| ptr::eq(Arc::as_ptr(c), device))
            else {
                log::debug!("[round {}] [{}] reported but is not pending", round.id, device.id());
                return;
            };
            round.pending.remove(pos);
            round.reported.push(device.id().to_string());
            log::debug!(
                "[round {}] [{}] reported, {} pending",
                round.id,
                device.id(),
                round.pending.len()
            );
            let closed = round.pending.is_empty();

            state.aggregate.insert(snapshot.id.clone(), snapshot);
            if closed {
                state
                    .current
                    .take()
                    .map(|round| self.close(&mut state, round, Vec::new()))
            } else {
                None
            }
        };
        if let Some(flush) = flush {
            self.emit(flush);
        }
    }

    fn error_occurred(&self, device: &DeviceController, error: &ControllerError) {
        log::warn!("[{}] {}", device.id(), error);
    }
}

impl Drop for FleetCoordinator {
    fn drop(&mut self) {
        for event_loop in &self.event_loops {
            event_loop.abort();
        }
        if let Some(deadline) = self
            .round
            .get_mut()
            .current
            .as_mut()
            .and_then(|r| r.deadline.take())
        {
            deadline.abort();
        }
    }
}
