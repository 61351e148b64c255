//! The seam between the overseer and whatever actually runs timers and
//! background work.
//!
//! The overseer never sleeps or spawns on its own. It asks an
//! [`AsyncGateway`] to do so and gets back an [`AsyncHandle`] it can cancel.
//! Two gateways ship with the crate:
//!
//! - [`ManualGateway`]: a virtual clock driven by the caller. Nothing runs
//!   until `advance`, `fire_timer` or `run_task` is called.
//! - [`TokioGateway`]: real timers on a tokio runtime, background work on
//!   the blocking pool.
//!
//! # Contract
//!
//! A gateway must never invoke a callback from inside the scheduling call
//! that registered it.

mod manual;
mod tokio_gateway;

pub use manual::ManualGateway;
pub use tokio_gateway::TokioGateway;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::async_update::TimerKey;
use crate::message::Message;

/// Invoked with the timer's key and payload each time it fires.
pub type TimerCallback = Arc<dyn Fn(TimerKey, Message) + Send + Sync>;

/// Work to run off the calling thread.
pub type BackgroundTask = Box<dyn FnOnce() + Send>;

/// Cancellable handle to a scheduled timer or background task.
pub trait AsyncHandle: Send + Sync {
    /// Cancel the work. False if it already completed or was cancelled.
    fn cancel(&self) -> bool;

    /// True once cancelled.
    fn is_cancelled(&self) -> bool;

    /// True once completed or cancelled.
    fn is_done(&self) -> bool;
}

/// Scheduling substrate for timers and background work.
pub trait AsyncGateway: Send + Sync {
    /// Invoke `callback(key, message)` once, after `delay`.
    fn schedule_once(
        &self,
        key: TimerKey,
        delay: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>>;

    /// Invoke `callback(key, message)` after `initial_delay`, then every
    /// `period` until cancelled.
    fn schedule_periodic(
        &self,
        key: TimerKey,
        initial_delay: Duration,
        period: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>>;

    /// Run `task` off the calling thread.
    fn run_in_background(&self, task: BackgroundTask) -> anyhow::Result<Arc<dyn AsyncHandle>>;
}

const PENDING: u8 = 0;
const DONE: u8 = 1;
const CANCELLED: u8 = 2;

/// Atomic pending / done / cancelled status shared by the bundled handles.
#[derive(Debug, Default)]
pub struct HandleStatus(AtomicU8);

impl HandleStatus {
    /// Move from pending to cancelled.
    pub fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    /// Move from pending to done.
    pub fn complete(&self) -> bool {
        self.transition(DONE)
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }

    /// True once completed or cancelled.
    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire) != PENDING
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl AsyncHandle for HandleStatus {
    fn cancel(&self) -> bool {
        HandleStatus::cancel(self)
    }

    fn is_cancelled(&self) -> bool {
        HandleStatus::is_cancelled(self)
    }

    fn is_done(&self) -> bool {
        HandleStatus::is_done(self)
    }
}
