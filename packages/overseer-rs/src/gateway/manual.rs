//! Deterministic gateway driven by a virtual clock.
//!
//! Useful for synchronous drivers (game loops, simulations) and tests.
//! Timers fire when the clock is advanced past their due time or when fired
//! explicitly by key; background tasks run when the driver runs them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::{AsyncGateway, AsyncHandle, BackgroundTask, HandleStatus, TimerCallback};
use crate::async_update::TimerKey;
use crate::error::GatewayError;
use crate::message::Message;

struct ManualTimer {
    key: TimerKey,
    /// `None` once the due time is past what the clock can represent.
    due: Option<Duration>,
    period: Option<Duration>,
    message: Message,
    callback: TimerCallback,
    status: Arc<HandleStatus>,
}

struct PendingTask {
    task: BackgroundTask,
    status: Arc<HandleStatus>,
}

#[derive(Default)]
struct Inner {
    now: Duration,
    timers: Vec<ManualTimer>,
    tasks: Vec<PendingTask>,
}

/// A gateway whose clock only moves when told to.
///
/// Callbacks always run outside the gateway's lock, so a fired timer may
/// schedule new work on the same gateway.
///
/// # Example
///
/// ```ignore
/// let gateway = Arc::new(ManualGateway::new());
/// let overseer = Overseer::new(gateway.clone());
/// overseer.start(idle);
///
/// gateway.advance(Duration::from_secs(5)); // fires anything due by t=5s
/// gateway.run_all_tasks();                 // completes background work
/// ```
#[derive(Default)]
pub struct ManualGateway {
    inner: Mutex<Inner>,
}

impl ManualGateway {
    /// A gateway at virtual time zero with nothing scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    /// Move the clock forward by `by`, firing every timer that comes due in
    /// order of due time. Returns the number of fires.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.inner.lock().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let due = {
                let mut inner = self.inner.lock();
                inner.timers.retain(|t| !t.status.is_done());
                let next = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter_map(|(i, t)| {
                        t.due.filter(|due| *due <= target).map(|due| (i, due))
                    })
                    .min_by_key(|(_, due)| *due)
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let firing = Self::arm_fire(&mut inner.timers[i]);
                        if let Some(due) = firing.due {
                            inner.now = inner.now.max(due);
                        }
                        firing
                    }
                    None => {
                        inner.now = target;
                        break;
                    }
                }
            };
            trace!(key = %due.key, at = ?due.due, "manual timer due");
            (due.callback)(due.key, due.message);
            fired += 1;
        }

        fired
    }

    /// Fire the most recently scheduled timer for `key` now, regardless of
    /// its due time. A one-shot timer completes; a periodic one stays armed.
    ///
    /// Keys are only unique per state. When several states hold a timer with
    /// the same key, the newest one fires and older ones can only be reached
    /// through [`ManualGateway::advance`].
    pub fn fire_timer(&self, key: impl Into<TimerKey>) -> Result<(), GatewayError> {
        let key = key.into();
        let firing = {
            let mut inner = self.inner.lock();
            let timer = inner
                .timers
                .iter_mut()
                .rev()
                .find(|t| t.key == key)
                .ok_or_else(|| GatewayError::TimerNotScheduled { key: key.clone() })?;
            if timer.status.is_cancelled() {
                return Err(GatewayError::TimerCancelled { key });
            }
            if timer.status.is_done() {
                return Err(GatewayError::TimerNotScheduled { key });
            }
            Self::arm_fire(timer)
        };
        (firing.callback)(firing.key, firing.message);
        Ok(())
    }

    /// Run the pending background task at `index` (oldest first).
    ///
    /// A task cancelled before it ran is discarded without running.
    pub fn run_task(&self, index: usize) -> Result<(), GatewayError> {
        let pending = {
            let mut inner = self.inner.lock();
            if index >= inner.tasks.len() {
                return Err(GatewayError::NoSuchTask {
                    index,
                    pending: inner.tasks.len(),
                });
            }
            inner.tasks.remove(index)
        };
        if pending.status.is_cancelled() {
            trace!(index, "skipping cancelled background task");
            return Ok(());
        }
        (pending.task)();
        pending.status.complete();
        Ok(())
    }

    /// Run pending background tasks, including ones they schedule, until
    /// none are left. Returns the number run.
    pub fn run_all_tasks(&self) -> usize {
        let mut ran = 0;
        while self.run_task(0).is_ok() {
            ran += 1;
        }
        ran
    }

    /// Background tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Keys of timers that can still fire, in scheduling order.
    pub fn scheduled_timers(&self) -> Vec<TimerKey> {
        self.inner
            .lock()
            .timers
            .iter()
            .filter(|t| !t.status.is_done())
            .map(|t| t.key.clone())
            .collect()
    }

    /// Snapshot what a fire needs and re-arm or complete the timer.
    fn arm_fire(timer: &mut ManualTimer) -> Firing {
        let firing = Firing {
            key: timer.key.clone(),
            due: timer.due,
            message: timer.message.clone(),
            callback: timer.callback.clone(),
        };
        match timer.period {
            Some(period) => timer.due = timer.due.and_then(|due| due.checked_add(period)),
            None => {
                timer.status.complete();
            }
        }
        firing
    }

    fn push_timer(
        &self,
        key: TimerKey,
        delay: Duration,
        period: Option<Duration>,
        message: Message,
        callback: TimerCallback,
    ) -> Arc<HandleStatus> {
        let status = Arc::new(HandleStatus::default());
        let mut inner = self.inner.lock();
        let due = inner.now.checked_add(delay);
        if due.is_none() {
            trace!(key = %key, "due past the end of the virtual clock, fires only by key");
        }
        inner.timers.push(ManualTimer {
            key,
            due,
            period,
            message,
            callback,
            status: status.clone(),
        });
        status
    }
}

struct Firing {
    key: TimerKey,
    due: Option<Duration>,
    message: Message,
    callback: TimerCallback,
}

impl AsyncGateway for ManualGateway {
    fn schedule_once(
        &self,
        key: TimerKey,
        delay: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        Ok(self.push_timer(key, delay, None, message, callback))
    }

    fn schedule_periodic(
        &self,
        key: TimerKey,
        initial_delay: Duration,
        period: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        if period.is_zero() {
            return Err(GatewayError::ZeroPeriod { key }.into());
        }
        Ok(self.push_timer(key, initial_delay, Some(period), message, callback))
    }

    fn run_in_background(&self, task: BackgroundTask) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        let status = Arc::new(HandleStatus::default());
        self.inner.lock().tasks.push(PendingTask {
            task,
            status: status.clone(),
        });
        Ok(status)
    }
}

impl std::fmt::Debug for ManualGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ManualGateway")
            .field("now", &inner.now)
            .field("timers", &inner.timers.len())
            .field("tasks", &inner.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (TimerCallback, Arc<Mutex<Vec<(String, u32)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let callback: TimerCallback = Arc::new(move |key: TimerKey, msg: Message| {
            let value = msg.downcast_ref::<u32>().copied().unwrap_or_default();
            sink.lock().push((key.to_string(), value));
        });
        (callback, log)
    }

    #[test]
    fn test_advance_fires_in_due_order() {
        let gateway = ManualGateway::new();
        let (callback, log) = recorder();
        gateway
            .schedule_once("late".into(), Duration::from_secs(3), Message::new(3u32), callback.clone())
            .unwrap();
        gateway
            .schedule_once("early".into(), Duration::from_secs(1), Message::new(1u32), callback)
            .unwrap();

        assert_eq!(gateway.advance(Duration::from_secs(2)), 1);
        assert_eq!(gateway.now(), Duration::from_secs(2));
        assert_eq!(gateway.advance(Duration::from_secs(2)), 1);
        assert_eq!(
            *log.lock(),
            vec![("early".to_string(), 1), ("late".to_string(), 3)]
        );
        assert!(gateway.scheduled_timers().is_empty());
    }

    #[test]
    fn test_periodic_rearms_until_cancelled() {
        let gateway = ManualGateway::new();
        let (callback, log) = recorder();
        let handle = gateway
            .schedule_periodic(
                "tick".into(),
                Duration::ZERO,
                Duration::from_secs(1),
                Message::new(7u32),
                callback,
            )
            .unwrap();

        assert_eq!(gateway.advance(Duration::from_millis(2500)), 3);
        assert!(handle.cancel());
        assert_eq!(gateway.advance(Duration::from_secs(5)), 0);
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_fire_timer_reports_cancelled_and_missing() {
        let gateway = ManualGateway::new();
        let (callback, _log) = recorder();
        let handle = gateway
            .schedule_once("t".into(), Duration::from_secs(9), Message::new(1u32), callback)
            .unwrap();
        handle.cancel();

        assert!(matches!(
            gateway.fire_timer("t"),
            Err(GatewayError::TimerCancelled { .. })
        ));
        assert!(matches!(
            gateway.fire_timer("other"),
            Err(GatewayError::TimerNotScheduled { .. })
        ));
    }

    #[test]
    fn test_fire_timer_completes_one_shot() {
        let gateway = ManualGateway::new();
        let (callback, log) = recorder();
        let handle = gateway
            .schedule_once("t".into(), Duration::from_secs(9), Message::new(1u32), callback)
            .unwrap();

        gateway.fire_timer("t").unwrap();
        assert!(handle.is_done());
        assert!(!handle.cancel());
        assert!(gateway.fire_timer("t").is_err());
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_far_future_timers_do_not_overflow_the_clock() {
        let gateway = ManualGateway::new();
        let (callback, log) = recorder();
        gateway.advance(Duration::from_secs(1));
        gateway
            .schedule_once("never".into(), Duration::MAX, Message::new(1u32), callback.clone())
            .unwrap();
        gateway
            .schedule_periodic(
                "rare".into(),
                Duration::from_secs(1),
                Duration::MAX,
                Message::new(2u32),
                callback,
            )
            .unwrap();

        assert_eq!(gateway.advance(Duration::MAX), 1);
        assert_eq!(gateway.now(), Duration::MAX);
        assert_eq!(gateway.advance(Duration::from_secs(1)), 0);
        assert_eq!(gateway.scheduled_timers().len(), 2);

        gateway.fire_timer("never").unwrap();
        assert_eq!(
            *log.lock(),
            vec![("rare".to_string(), 2), ("never".to_string(), 1)]
        );
    }

    #[test]
    fn test_fire_timer_picks_newest_of_shared_key() {
        let gateway = ManualGateway::new();
        let (callback, log) = recorder();
        gateway
            .schedule_once("t".into(), Duration::from_secs(5), Message::new(1u32), callback.clone())
            .unwrap();
        gateway
            .schedule_once("t".into(), Duration::from_secs(5), Message::new(2u32), callback)
            .unwrap();

        gateway.fire_timer("t").unwrap();
        assert_eq!(*log.lock(), vec![("t".to_string(), 2)]);

        // The older timer is still reachable through the clock.
        assert_eq!(gateway.advance(Duration::from_secs(5)), 1);
        assert_eq!(log.lock()[1], ("t".to_string(), 1));
    }

    #[test]
    fn test_zero_period_rejected() {
        let gateway = ManualGateway::new();
        let (callback, _log) = recorder();
        let err = gateway
            .schedule_periodic("p".into(), Duration::ZERO, Duration::ZERO, Message::new(1u32), callback)
            .err()
            .unwrap();
        assert!(err.to_string().contains("zero period"));
    }

    #[test]
    fn test_tasks_run_on_demand() {
        let gateway = Arc::new(ManualGateway::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let inner_gateway = gateway.clone();
        gateway
            .run_in_background(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                let c = c.clone();
                inner_gateway
                    .run_in_background(Box::new(move || {
                        c.fetch_add(10, Ordering::SeqCst);
                    }))
                    .unwrap();
            }))
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.pending_tasks(), 1);
        assert_eq!(gateway.run_all_tasks(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert!(matches!(
            gateway.run_task(0),
            Err(GatewayError::NoSuchTask { index: 0, pending: 0 })
        ));
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let gateway = ManualGateway::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handle = gateway
            .run_in_background(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(handle.cancel());
        gateway.run_task(0).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
