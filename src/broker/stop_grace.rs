//! Cancelable single-shot delay before stopping the managed service.
//!
//! Each arming is tagged with an epoch. The scheduler delivers the epoch back
//! to the controller when the delay elapses, and a delivery whose epoch is not
//! the currently armed one is discarded. Disarming therefore takes effect
//! immediately even if the timer message is already queued.

use std::time::Duration;
use tokio::task::AbortHandle;

/// Default grace window between the last release and stopping the service.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(60);

/// Schedules delivery of a stop-grace expiry back to the controller loop.
pub trait Scheduler: Send {
    fn schedule_stop_grace(&self, delay: Duration, epoch: u64) -> ScheduledTask;
}

/// Handle to a pending scheduled delivery.
#[derive(Debug)]
pub struct ScheduledTask {
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A task with nothing to cancel.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self { abort: None }
    }

    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

#[derive(Debug)]
struct Armed {
    epoch: u64,
    task: ScheduledTask,
}

#[derive(Debug)]
pub struct StopGraceTimer {
    interval: Duration,
    armed: Option<Armed>,
    last_epoch: u64,
}

impl StopGraceTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            armed: None,
            last_epoch: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arm the timer. Returns false if it was already armed.
    pub fn arm(&mut self, scheduler: &dyn Scheduler) -> bool {
        if self.armed.is_some() {
            return false;
        }
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        let task = scheduler.schedule_stop_grace(self.interval, epoch);
        self.armed = Some(Armed { epoch, task });
        tracing::debug!(epoch, interval = ?self.interval, "stop grace armed");
        true
    }

    /// Disarm the timer. Returns false if it was not armed.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.task.cancel();
                tracing::debug!(epoch = armed.epoch, "stop grace disarmed");
                true
            }
            None => false,
        }
    }

    /// Consume an expiry. Returns true only for the currently armed epoch, in
    /// which case the timer is no longer armed.
    pub fn take_expired(&mut self, epoch: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.epoch == epoch => {
                self.armed = None;
                true
            }
            _ => {
                tracing::debug!(epoch, "ignoring stale stop grace expiry");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingScheduler;
    use super::*;

    #[test]
    fn test_arm_twice_schedules_once() {
        let scheduler = RecordingScheduler::default();
        let mut timer = StopGraceTimer::new(Duration::from_secs(60));

        assert!(timer.arm(&scheduler));
        assert!(!timer.arm(&scheduler));
        assert_eq!(scheduler.scheduled(), vec![(Duration::from_secs(60), 1)]);
    }

    #[test]
    fn test_disarm_when_not_armed_is_noop() {
        let mut timer = StopGraceTimer::new(DEFAULT_STOP_GRACE);
        assert!(!timer.disarm());
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_expiry_clears_armed_state() {
        let scheduler = RecordingScheduler::default();
        let mut timer = StopGraceTimer::new(DEFAULT_STOP_GRACE);
        timer.arm(&scheduler);

        assert!(timer.take_expired(1));
        assert!(!timer.is_armed());
        assert!(!timer.take_expired(1));
    }

    #[test]
    fn test_expiry_after_disarm_is_ignored() {
        let scheduler = RecordingScheduler::default();
        let mut timer = StopGraceTimer::new(DEFAULT_STOP_GRACE);
        timer.arm(&scheduler);
        timer.disarm();

        assert!(!timer.take_expired(1));
    }

    #[test]
    fn test_stale_epoch_does_not_consume_rearmed_timer() {
        let scheduler = RecordingScheduler::default();
        let mut timer = StopGraceTimer::new(DEFAULT_STOP_GRACE);
        timer.arm(&scheduler);
        timer.disarm();
        timer.arm(&scheduler);

        assert!(!timer.take_expired(1));
        assert!(timer.is_armed());
        assert!(timer.take_expired(2));
    }

    #[tokio::test]
    async fn test_cancel_aborts_scheduled_task() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let task = ScheduledTask::new(handle.abort_handle());

        task.cancel();
        let result = handle.await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
