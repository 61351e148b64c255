//! Single-drainer FIFO that serializes everything the engine processes.
//!
//! Every input (a start, an external message, a timer fire, a task result)
//! becomes an [`Envelope`] pushed onto one queue. Whoever finds the queue
//! idle becomes the drainer and processes envelopes in FIFO order until the
//! queue is empty. Anyone arriving while a drain is in progress, whether a
//! state handler calling back in on the same thread or a timer firing on
//! another, only enqueues and returns.
//!
//! ```text
//! handle_message ──► enqueue ──► draining? ── yes ──► return
//!                                   │
//!                                   no
//!                                   ▼
//!                         pop ──► engine.deliver ──┐
//!                          ▲                       │
//!                          └──── queue not empty ◄─┘
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

use crate::async_update::TimerKey;
use crate::executions::TaskId;
use crate::message::Message;
use crate::state::State;
use crate::timers::{Owner, TimerId};

/// One unit of work for the engine.
pub(crate) enum Envelope {
    /// Put a state on top of the stack.
    Start(State),
    /// An external message addressed to a stack index.
    Message { message: Message, index: usize },
    /// A timer fire, addressed to the timer's owner.
    Timer {
        owner: Owner,
        key: TimerKey,
        id: TimerId,
        periodic: bool,
        message: Message,
    },
    /// A background task's result, addressed to the task's owner.
    Task {
        owner: Owner,
        id: TaskId,
        message: Message,
    },
}

impl Envelope {
    fn kind(&self) -> &'static str {
        match self {
            Envelope::Start(_) => "start",
            Envelope::Message { .. } => "message",
            Envelope::Timer { .. } => "timer",
            Envelope::Task { .. } => "task",
        }
    }
}

#[derive(Default)]
struct PumpState {
    queue: VecDeque<Envelope>,
    draining: bool,
}

/// The queue plus the busy flag.
#[derive(Default)]
pub(crate) struct Pump {
    state: Mutex<PumpState>,
}

/// Clears the busy flag if a handler panics mid-drain.
struct DrainGuard<'a> {
    pump: &'a Pump,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.pump.state.lock();
            state.draining = false;
        }
    }
}

impl Pump {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue `envelope` and, if nobody is draining, drain with `deliver`.
    pub(crate) fn submit(&self, envelope: Envelope, mut deliver: impl FnMut(Envelope)) {
        {
            let mut state = self.state.lock();
            let kind = envelope.kind();
            state.queue.push_back(envelope);
            if state.draining {
                trace!(kind, queued = state.queue.len(), "drain in progress, queued");
                return;
            }
            state.draining = true;
        }

        let _guard = DrainGuard { pump: self };
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(envelope) => envelope,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            deliver(next);
        }
    }

    /// Envelopes waiting for the drainer.
    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}
