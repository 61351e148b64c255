//! Timer and background-execution requests attached to a [`Next`](crate::Next).
//!
//! An [`AsyncUpdate`] is inert data. Nothing is scheduled until the overseer
//! applies the `Next` that carries it, and then the work is attributed to the
//! state that produced that `Next`.
//!
//! # Timer semantics
//!
//! - Keys are scoped per stack occupancy: two states (or the same state in
//!   two slots) can both use `"poll"` without interfering.
//! - Within one update, a later request for a key replaces an earlier one.
//! - A *passive* set is a no-op if the key already has a live timer.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use overseer::{ExecuteAsync, Next, SetSingleTimer};
//!
//! Next::stay()
//!     .timer(SetSingleTimer::new("timeout", Duration::from_secs(5), Timeout))
//!     .execute(ExecuteAsync::new(|| fetch_config()));
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::message::Message;

/// Key naming a timer within its owner's scope.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(Arc<str>);

impl TimerKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TimerKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for TimerKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerKey({:?})", &*self.0)
    }
}

/// Cancel the owner's timer for `key`, if any.
#[derive(Debug, Clone)]
pub struct CancelTimer {
    /// Timer to cancel.
    pub key: TimerKey,
}

impl CancelTimer {
    /// Cancel the timer named `key`.
    pub fn new(key: impl Into<TimerKey>) -> Self {
        Self { key: key.into() }
    }
}

/// Deliver `message` to the owner once, after `delay`.
#[derive(Debug, Clone)]
pub struct SetSingleTimer {
    /// Timer name.
    pub key: TimerKey,
    /// Time until the timer fires.
    pub delay: Duration,
    /// Payload delivered on fire.
    pub message: Message,
    /// Leave an existing timer with the same key untouched.
    pub passive: bool,
}

impl SetSingleTimer {
    /// Fire `message` once after `delay`.
    pub fn new<T: Any + Send + Sync>(key: impl Into<TimerKey>, delay: Duration, message: T) -> Self {
        Self {
            key: key.into(),
            delay,
            message: Message::new(message),
            passive: false,
        }
    }

    /// Only set the timer if none exists for the key.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Deliver `message` to the owner every `period`, starting after `initial_delay`.
#[derive(Debug, Clone)]
pub struct SetPeriodicTimer {
    /// Timer name.
    pub key: TimerKey,
    /// Time between fires.
    pub period: Duration,
    /// Payload delivered on every fire.
    pub message: Message,
    /// Leave an existing timer with the same key untouched.
    pub passive: bool,
    /// Time until the first fire.
    pub initial_delay: Duration,
}

impl SetPeriodicTimer {
    /// Fire `message` every `period`, first fire immediately.
    pub fn new<T: Any + Send + Sync>(
        key: impl Into<TimerKey>,
        period: Duration,
        message: T,
    ) -> Self {
        Self {
            key: key.into(),
            period,
            message: Message::new(message),
            passive: false,
            initial_delay: Duration::ZERO,
        }
    }

    /// Only set the timer if none exists for the key.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Delay before the first fire.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// One timer request.
#[derive(Debug, Clone)]
pub enum TimerUpdate {
    /// See [`CancelTimer`].
    Cancel(CancelTimer),
    /// See [`SetSingleTimer`].
    Single(SetSingleTimer),
    /// See [`SetPeriodicTimer`].
    Periodic(SetPeriodicTimer),
}

impl TimerUpdate {
    /// Key this request targets.
    pub fn key(&self) -> &TimerKey {
        match self {
            TimerUpdate::Cancel(c) => &c.key,
            TimerUpdate::Single(s) => &s.key,
            TimerUpdate::Periodic(p) => &p.key,
        }
    }

    /// True for a set request that must not replace an existing timer.
    pub fn is_passive(&self) -> bool {
        match self {
            TimerUpdate::Cancel(_) => false,
            TimerUpdate::Single(s) => s.passive,
            TimerUpdate::Periodic(p) => p.passive,
        }
    }
}

impl From<CancelTimer> for TimerUpdate {
    fn from(update: CancelTimer) -> Self {
        TimerUpdate::Cancel(update)
    }
}

impl From<SetSingleTimer> for TimerUpdate {
    fn from(update: SetSingleTimer) -> Self {
        TimerUpdate::Single(update)
    }
}

impl From<SetPeriodicTimer> for TimerUpdate {
    fn from(update: SetPeriodicTimer) -> Self {
        TimerUpdate::Periodic(update)
    }
}

type TaskFn = Arc<dyn Fn() -> anyhow::Result<Message> + Send + Sync>;
type FailureMapperFn = Arc<dyn Fn(Arc<anyhow::Error>) -> anyhow::Result<Message> + Send + Sync>;

/// Run a computation off the dispatch path and deliver its result to the owner.
///
/// On success the task's value is delivered. On failure the failure mapper's
/// value is delivered; by default that is a [`Failure`](crate::Failure). A
/// task that returns `()` delivers nothing.
#[derive(Clone)]
pub struct ExecuteAsync {
    task: TaskFn,
    failure_mapper: Option<FailureMapperFn>,
}

impl ExecuteAsync {
    /// Run `task` in the background.
    pub fn new<F, T>(task: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self {
            task: Arc::new(move || task().map(Message::new)),
            failure_mapper: None,
        }
    }

    /// Replace the default `Failure` payload with `mapper`'s value.
    pub fn on_failure<M, T>(mut self, mapper: M) -> Self
    where
        M: Fn(Arc<anyhow::Error>) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.failure_mapper = Some(Arc::new(move |err| mapper(err).map(Message::new)));
        self
    }

    /// Run the task, turning a panic into an error.
    pub(crate) fn run(&self) -> Result<Message, Arc<anyhow::Error>> {
        match catch_unwind(AssertUnwindSafe(|| (self.task)())) {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => Err(Arc::new(err)),
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(Arc::new(anyhow::anyhow!(
                    "background task panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    /// Map a task failure. `None` means the default mapping applies.
    pub(crate) fn map_failure(&self, err: Arc<anyhow::Error>) -> Option<anyhow::Result<Message>> {
        let mapper = self.failure_mapper.as_ref()?;
        Some(
            catch_unwind(AssertUnwindSafe(|| mapper(err)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("failure mapper panicked"))),
        )
    }
}

impl fmt::Debug for ExecuteAsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteAsync")
            .field("custom_failure_mapper", &self.failure_mapper.is_some())
            .finish_non_exhaustive()
    }
}

/// Either kind of async request, for building updates from mixed lists.
#[derive(Debug, Clone)]
pub enum AsyncTask {
    /// A timer request.
    Timer(TimerUpdate),
    /// A background execution.
    Execute(ExecuteAsync),
}

impl From<TimerUpdate> for AsyncTask {
    fn from(update: TimerUpdate) -> Self {
        AsyncTask::Timer(update)
    }
}

impl From<CancelTimer> for AsyncTask {
    fn from(update: CancelTimer) -> Self {
        AsyncTask::Timer(update.into())
    }
}

impl From<SetSingleTimer> for AsyncTask {
    fn from(update: SetSingleTimer) -> Self {
        AsyncTask::Timer(update.into())
    }
}

impl From<SetPeriodicTimer> for AsyncTask {
    fn from(update: SetPeriodicTimer) -> Self {
        AsyncTask::Timer(update.into())
    }
}

impl From<ExecuteAsync> for AsyncTask {
    fn from(execution: ExecuteAsync) -> Self {
        AsyncTask::Execute(execution)
    }
}

/// Timer updates and background executions requested by one `Next`.
#[derive(Debug, Clone, Default)]
pub struct AsyncUpdate {
    timers: Vec<TimerUpdate>,
    executions: Vec<ExecuteAsync>,
}

impl AsyncUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timer request, replacing any earlier request for the same key.
    pub fn with_timer(mut self, update: impl Into<TimerUpdate>) -> Self {
        self.push_timer(update.into());
        self
    }

    /// Add a background execution.
    pub fn with_execution(mut self, execution: ExecuteAsync) -> Self {
        self.executions.push(execution);
        self
    }

    /// Add either kind of request.
    pub fn with_task(self, task: impl Into<AsyncTask>) -> Self {
        match task.into() {
            AsyncTask::Timer(update) => self.with_timer(update),
            AsyncTask::Execute(execution) => self.with_execution(execution),
        }
    }

    /// Fold `other` into this update. Timers in `other` win on key clashes.
    pub fn merge(mut self, other: AsyncUpdate) -> Self {
        for update in other.timers {
            self.push_timer(update);
        }
        self.executions.extend(other.executions);
        self
    }

    /// Timer requests, in first-insertion order of their keys.
    pub fn timers(&self) -> &[TimerUpdate] {
        &self.timers
    }

    /// Background executions, in request order.
    pub fn executions(&self) -> &[ExecuteAsync] {
        &self.executions
    }

    /// True if nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.executions.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<TimerUpdate>, Vec<ExecuteAsync>) {
        (self.timers, self.executions)
    }

    fn push_timer(&mut self, update: TimerUpdate) {
        match self.timers.iter_mut().find(|t| t.key() == update.key()) {
            Some(slot) => *slot = update,
            None => self.timers.push(update),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_timer_for_same_key_wins() {
        let update = AsyncUpdate::new()
            .with_timer(SetSingleTimer::new("t1", Duration::ZERO, "first"))
            .with_timer(SetSingleTimer::new("t2", Duration::ZERO, "other"))
            .with_timer(SetSingleTimer::new("t1", Duration::ZERO, "second"));

        assert_eq!(update.timers().len(), 2);
        assert_eq!(update.timers()[0].key().as_str(), "t1");
        match &update.timers()[0] {
            TimerUpdate::Single(t) => {
                assert_eq!(t.message.downcast_ref::<&str>(), Some(&"second"))
            }
            other => panic!("Expected Single, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_replaces_set_for_same_key() {
        let update = AsyncUpdate::new()
            .with_timer(SetPeriodicTimer::new("poll", Duration::from_secs(1), "tick"))
            .with_timer(CancelTimer::new("poll"));
        assert_eq!(update.timers().len(), 1);
        assert!(matches!(update.timers()[0], TimerUpdate::Cancel(_)));
    }

    #[test]
    fn test_merge_accumulates_executions() {
        let a = AsyncUpdate::new().with_execution(ExecuteAsync::new(|| Ok(1)));
        let b = AsyncUpdate::new()
            .with_execution(ExecuteAsync::new(|| Ok(2)))
            .with_timer(CancelTimer::new("t"));
        let merged = a.merge(b);
        assert_eq!(merged.executions().len(), 2);
        assert_eq!(merged.timers().len(), 1);
        assert!(!merged.is_empty());
    }

    #[test]
    fn test_passive_flag() {
        assert!(SetSingleTimer::new("t", Duration::ZERO, 1).passive().passive);
        let update: TimerUpdate = SetPeriodicTimer::new("t", Duration::ZERO, 1).passive().into();
        assert!(update.is_passive());
        assert!(!TimerUpdate::from(CancelTimer::new("t")).is_passive());
    }

    #[test]
    fn test_execute_async_success() {
        let exec = ExecuteAsync::new(|| Ok("done"));
        let msg = exec.run().unwrap();
        assert_eq!(msg.downcast_ref::<&str>(), Some(&"done"));
    }

    #[test]
    fn test_execute_async_panic_becomes_error() {
        let exec = ExecuteAsync::new(|| -> anyhow::Result<u8> { panic!("kaboom") });
        let err = exec.run().unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_default_mapper_is_absent() {
        let exec = ExecuteAsync::new(|| -> anyhow::Result<u8> { Err(anyhow::anyhow!("boom")) });
        let err = exec.run().unwrap_err();
        assert!(exec.map_failure(err).is_none());
    }

    #[test]
    fn test_custom_mapper_runs() {
        let exec = ExecuteAsync::new(|| -> anyhow::Result<u8> { Err(anyhow::anyhow!("boom")) })
            .on_failure(|_| Ok("fallback"));
        let err = exec.run().unwrap_err();
        let mapped = exec.map_failure(err).unwrap().unwrap();
        assert_eq!(mapped.downcast_ref::<&str>(), Some(&"fallback"));
    }
}
