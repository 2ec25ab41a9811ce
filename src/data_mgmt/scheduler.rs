use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::helpers::delay_until_aligned;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("round interval must be greater than zero")]
    InvalidInterval,
    #[error("no tokio runtime available to drive the round timer")]
    NoRuntime,
}

/// Owner of the single periodic round timer
#[derive(Default)]
pub struct Scheduler {
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a timer calling `on_tick` every `interval`, replacing any active one
    ///
    /// The first tick fires immediately, or on the next multiple of the
    /// interval when `align` is set.
    pub fn schedule_rounds<F>(&self, interval: Duration, align: bool, on_tick: F) -> Result<(), SchedulerError>
    where
        F: Fn() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            log::debug!("Stopping active round timer before rescheduling");
            previous.abort();
        }

        *timer = Some(handle.spawn(async move {
            if align {
                let delay = delay_until_aligned(Utc::now(), interval.as_secs());
                log::debug!("Aligning round timer, first tick in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                on_tick();
            }
        }));
        log::info!("Round timer scheduled every {}s", interval.as_secs());
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_keeps_a_single_timer() {
        let scheduler = Scheduler::new();
        let (first, on_first) = counter();
        let (second, on_second) = counter();

        scheduler.schedule_rounds(Duration::from_secs(60), false, on_first).unwrap();
        scheduler.schedule_rounds(Duration::from_secs(60), false, on_second).unwrap();
        assert!(scheduler.is_active());

        tokio::time::sleep(Duration::from_secs(185)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        // Ticks at 0s, 60s, 120s and 180s
        assert_eq!(second.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let scheduler = Scheduler::new();
        let (count, on_tick) = counter();
        scheduler.schedule_rounds(Duration::from_secs(10), false, on_tick).unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.stop();
        assert!(!scheduler.is_active());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new();
        assert_eq!(
            scheduler.schedule_rounds(Duration::ZERO, false, || {}),
            Err(SchedulerError::InvalidInterval)
        );
        assert!(!scheduler.is_active());
    }

    #[test]
    fn test_no_runtime() {
        let scheduler = Scheduler::new();
        assert_eq!(
            scheduler.schedule_rounds(Duration::from_secs(1), false, || {}),
            Err(SchedulerError::NoRuntime)
        );
    }
}
