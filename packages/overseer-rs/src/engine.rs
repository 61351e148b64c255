//! The stack engine: dispatch, transition application, focus, and async
//! routing.
//!
//! The engine only ever runs on the pump's drainer, so at most one cascade
//! is in flight. The stack lock is held for reads and mutations only and is
//! always released before a state callback runs, which lets handlers read
//! [`Overseer::current_stack`](crate::Overseer::current_stack) freely.
//!
//! # Applying a `Next`
//!
//! ```text
//! ┌─ focus loop ─────────────────────────────────────────────┐
//! │ old_top = stack[0]                                       │
//! │ ┌─ start loop ─────────────────────────────────────────┐ │
//! │ │ apply async update against the recipient             │ │
//! │ │ mutate the stack, on_end for removed entries         │ │
//! │ │ stack[0] != old_top at any point? -> focus changed   │ │
//! │ │ new entry? -> on_start, its Next with it as recipient│ │
//! │ └──────────────────────────────────────────────────────┘ │
//! │ focus changed? -> on_focus_lost(old_top),                │
//! │                   on_focus_gained(stack[0]) -> loop again│
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::async_update::{AsyncUpdate, ExecuteAsync, TimerKey, TimerUpdate};
use crate::error::OverseerError;
use crate::executions::{run_to_message, ExecutionRegistry, TaskId};
use crate::gateway::{AsyncGateway, TimerCallback};
use crate::message::Message;
use crate::next::{Next, Transition};
use crate::overseer::Shared;
use crate::pump::Envelope;
use crate::stack::{Stack, StackEntry};
use crate::state::State;
use crate::timers::{Owner, TimerId, TimerRegistry};

/// The state a `Next` is attributed to, as occupant of a specific entry.
#[derive(Clone)]
struct Recipient {
    state: State,
    entry: Arc<StackEntry>,
}

impl Recipient {
    /// The entry's own state.
    fn head(entry: Arc<StackEntry>) -> Self {
        Self {
            state: entry.state().clone(),
            entry,
        }
    }

    fn owner(&self) -> Owner {
        Owner::new(self.entry.id(), self.state.clone())
    }
}

pub(crate) struct Engine {
    stack: Mutex<Stack>,
    timers: TimerRegistry,
    executions: ExecutionRegistry,
    gateway: Arc<dyn AsyncGateway>,
    max_chain_depth: usize,
    shared: Weak<Shared>,
}

impl Engine {
    pub(crate) fn new(
        gateway: Arc<dyn AsyncGateway>,
        max_chain_depth: usize,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            stack: Mutex::new(Stack::default()),
            timers: TimerRegistry::new(),
            executions: ExecutionRegistry::new(),
            gateway,
            max_chain_depth,
            shared,
        }
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub(crate) fn states(&self) -> Vec<State> {
        self.stack.lock().states()
    }

    pub(crate) fn len(&self) -> usize {
        self.stack.lock().len()
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn pending_executions(&self) -> usize {
        self.executions.len()
    }

    fn top(&self) -> Option<Arc<StackEntry>> {
        self.stack.lock().top()
    }

    fn index_of(&self, entry: &StackEntry) -> Option<usize> {
        self.stack.lock().index_of(entry.id())
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Process one envelope. Only called by the pump's drainer.
    pub(crate) fn deliver(&self, envelope: Envelope) {
        match envelope {
            Envelope::Start(state) => self.apply(Next::absolute_start(state), None),
            Envelope::Message { message, index } => self.dispatch(&message, index),
            Envelope::Timer {
                owner,
                key,
                id,
                periodic,
                message,
            } => self.deliver_timer(owner, key, id, periodic, message),
            Envelope::Task { owner, id, message } => self.deliver_task(owner, id, message),
        }
    }

    fn dispatch(&self, message: &Message, index: usize) {
        let entry = {
            let stack = self.stack.lock();
            match stack.get(index) {
                Some(entry) => entry,
                None => {
                    OverseerError::IndexOutOfBounds {
                        index,
                        len: stack.len(),
                    }
                    .log();
                    return;
                }
            }
        };
        self.dispatch_from(message, entry, 0);
    }

    /// Offer `message` to `entry`'s chain starting at `link`; first match wins.
    fn dispatch_from(&self, message: &Message, entry: Arc<StackEntry>, link: usize) {
        let found = entry
            .chain()
            .iter()
            .skip(link)
            .find(|state| state.accepts(message))
            .cloned();

        let Some(state) = found else {
            OverseerError::Unhandled {
                message_type: message.type_name(),
                state: entry.state().name().to_string(),
            }
            .log();
            return;
        };

        debug!(
            state = %state.name(),
            message = message.type_name(),
            "applying message to state"
        );
        match state.apply(message) {
            Some(next) => self.apply(next, Some(Recipient { state, entry })),
            None => OverseerError::Unhandled {
                message_type: message.type_name(),
                state: state.name().to_string(),
            }
            .log(),
        }
    }

    fn deliver_timer(
        &self,
        owner: Owner,
        key: TimerKey,
        id: TimerId,
        periodic: bool,
        message: Message,
    ) {
        if !self.timers.is_current(&owner, &key, id) {
            trace!(key = %key, state = %owner.state.name(), "dropping fire of a replaced timer");
            return;
        }
        match self.resolve(&owner) {
            Some((entry, link)) => {
                if !periodic {
                    self.timers.release(&owner, &key, id);
                }
                debug!(key = %key, state = %owner.state.name(), "timer fired");
                self.dispatch_from(&message, entry, link);
            }
            None => {
                OverseerError::OwnerGone {
                    kind: "timer",
                    state: owner.state.name().to_string(),
                }
                .log();
                self.purge(&owner);
            }
        }
    }

    fn deliver_task(&self, owner: Owner, id: TaskId, message: Message) {
        if !self.executions.finish(&owner, id) {
            trace!(state = %owner.state.name(), "dropping result of a purged execution");
            return;
        }
        match self.resolve(&owner) {
            Some((entry, link)) => {
                if message.is_unit() {
                    trace!(state = %owner.state.name(), "background task finished");
                    return;
                }
                debug!(
                    state = %owner.state.name(),
                    message = message.type_name(),
                    "background task result"
                );
                self.dispatch_from(&message, entry, link);
            }
            None => {
                OverseerError::OwnerGone {
                    kind: "background task",
                    state: owner.state.name().to_string(),
                }
                .log();
                self.purge(&owner);
            }
        }
    }

    /// Where the owner lives now, and the chain position to dispatch from.
    fn resolve(&self, owner: &Owner) -> Option<(Arc<StackEntry>, usize)> {
        self.stack.lock().resolve(owner.entry, &owner.state)
    }

    fn purge(&self, owner: &Owner) {
        let timers = self.timers.purge(owner);
        let executions = self.executions.purge(owner);
        debug!(
            state = %owner.state.name(),
            timers,
            executions,
            "purged async work of a state that left the stack"
        );
    }

    // =========================================================================
    // Transition application
    // =========================================================================

    fn apply(&self, next: Next, recipient: Option<Recipient>) {
        let mut focus_step = Some((next, recipient));

        while let Some((next, recipient)) = focus_step.take() {
            let old_top = self.top();
            let mut focus_changed = false;
            let mut start_step = Some((next, recipient));

            while let Some((next, recipient)) = start_step.take() {
                let started = self.apply_one(next, recipient);

                if !same_entry(self.top().as_ref(), old_top.as_ref()) {
                    focus_changed = true;
                }

                if let Some(entry) = started {
                    let state = entry.state().clone();
                    trace!(state = %state.name(), "starting state");
                    let next = state.on_start();
                    start_step = Some((next, Some(Recipient::head(entry))));
                }
            }

            if !focus_changed {
                continue;
            }

            if let Some(State::Primary(state)) = old_top.as_ref().map(|e| e.state()) {
                debug!(state = %state.name(), "focus lost");
                state.on_focus_lost();
            }
            if let Some(entry) = self.top() {
                if let State::Primary(state) = entry.state() {
                    debug!(state = %state.name(), "focus gained");
                    let next = state.on_focus_gained();
                    focus_step = Some((next, Some(Recipient::head(entry))));
                }
            }
        }
    }

    /// Apply one `Next`. Returns the freshly created entry, if any.
    fn apply_one(&self, next: Next, recipient: Option<Recipient>) -> Option<Arc<StackEntry>> {
        let (transition, update) = next.into_parts();

        let Some(recipient) = recipient else {
            if !update.is_empty() {
                warn!(
                    transition = transition.kind(),
                    "async update without a recipient, discarding"
                );
            }
            return match transition {
                Transition::Stay => None,
                Transition::AbsoluteStart(state, position) => {
                    let entry = self.fresh(state);
                    self.stack.lock().insert_absolute(position, entry.clone());
                    Some(entry)
                }
                Transition::AbsoluteClear(state) => Some(self.clear_all(state)),
                other => {
                    OverseerError::MissingRecipient {
                        transition: other.kind(),
                    }
                    .log();
                    None
                }
            };
        };

        if transition.discards_recipient() {
            if !update.is_empty() {
                debug!(
                    state = %recipient.state.name(),
                    transition = transition.kind(),
                    "discarding async update of a cleared state"
                );
            }
        } else if !update.is_empty() {
            self.apply_update(&recipient, update);
        }

        if !transition.is_relative() {
            return match transition {
                Transition::AbsoluteStart(state, position) => {
                    let entry = self.fresh(state);
                    self.stack.lock().insert_absolute(position, entry.clone());
                    Some(entry)
                }
                Transition::AbsoluteClear(state) => Some(self.clear_all(state)),
                _ => None,
            };
        }

        let Some(index) = self.index_of(&recipient.entry) else {
            OverseerError::MissingRecipient {
                transition: transition.kind(),
            }
            .log();
            return None;
        };

        trace!(
            state = %recipient.state.name(),
            index,
            transition = transition.kind(),
            "applying transition"
        );

        match transition {
            Transition::Goto(state) => {
                let entry = self.fresh(state);
                let old = self.stack.lock().replace(index, entry.clone());
                old.state().on_end();
                Some(entry)
            }
            Transition::Start(state, position) => {
                let entry = self.fresh(state);
                self.stack
                    .lock()
                    .insert_relative(index, position, entry.clone());
                Some(entry)
            }
            Transition::Done => {
                let old = self.stack.lock().remove(index);
                old.state().on_end();
                None
            }
            Transition::Clear(state, range) => {
                let entry = self.fresh(state);
                let cleared = self.stack.lock().clear_range(index, range, entry.clone());
                for old in cleared {
                    old.state().on_end();
                }
                Some(entry)
            }
            Transition::Stay | Transition::AbsoluteStart(..) | Transition::AbsoluteClear(_) => {
                None
            }
        }
    }

    fn fresh(&self, state: State) -> Arc<StackEntry> {
        StackEntry::new(state, self.max_chain_depth)
    }

    fn clear_all(&self, state: State) -> Arc<StackEntry> {
        let entry = self.fresh(state);
        let cleared = self.stack.lock().clear_all(entry.clone());
        for old in cleared {
            old.state().on_end();
        }
        entry
    }

    // =========================================================================
    // Async updates
    // =========================================================================

    fn apply_update(&self, recipient: &Recipient, update: AsyncUpdate) {
        let owner = recipient.owner();
        let (timers, executions) = update.into_parts();
        for timer in timers {
            self.update_timer(&owner, timer);
        }
        for execution in executions {
            self.run_execution(&owner, execution);
        }
    }

    fn update_timer(&self, owner: &Owner, update: TimerUpdate) {
        let key = update.key().clone();
        let state = owner.state.name();

        if update.is_passive() && self.timers.contains(owner, &key) {
            trace!(key = %key, state = %state, "timer already set, passive set ignored");
            return;
        }
        if self.timers.cancel(owner, &key) {
            trace!(key = %key, state = %state, "cancelled existing timer");
        }

        let scheduled = match update {
            TimerUpdate::Cancel(_) => {
                debug!(key = %key, state = %state, "timer cancelled");
                return;
            }
            TimerUpdate::Single(timer) => {
                let id = self.timers.reserve(owner, &key);
                let callback = self.timer_callback(owner, id, false);
                let result =
                    self.gateway
                        .schedule_once(key.clone(), timer.delay, timer.message, callback);
                (id, result)
            }
            TimerUpdate::Periodic(timer) => {
                let id = self.timers.reserve(owner, &key);
                let callback = self.timer_callback(owner, id, true);
                let result = self.gateway.schedule_periodic(
                    key.clone(),
                    timer.initial_delay,
                    timer.period,
                    timer.message,
                    callback,
                );
                (id, result)
            }
        };

        match scheduled {
            (id, Ok(handle)) => {
                self.timers.attach(owner, &key, id, handle);
                debug!(key = %key, state = %state, "timer set");
            }
            (id, Err(source)) => {
                self.timers.release(owner, &key, id);
                OverseerError::ScheduleTimer {
                    key,
                    state: state.to_string(),
                    source,
                }
                .log();
            }
        }
    }

    fn timer_callback(&self, owner: &Owner, id: TimerId, periodic: bool) -> TimerCallback {
        let shared = self.shared.clone();
        let owner = owner.clone();
        Arc::new(move |key: TimerKey, message: Message| match shared.upgrade() {
            Some(shared) => shared.submit(Envelope::Timer {
                owner: owner.clone(),
                key,
                id,
                periodic,
                message,
            }),
            None => trace!(key = %key, "overseer dropped, ignoring timer"),
        })
    }

    fn run_execution(&self, owner: &Owner, execution: ExecuteAsync) {
        let id = self.executions.reserve(owner);
        let shared = self.shared.clone();
        let task_owner = owner.clone();

        let task = Box::new(move || {
            let message = run_to_message(&execution, task_owner.state.name());
            match shared.upgrade() {
                Some(shared) => shared.submit(Envelope::Task {
                    owner: task_owner,
                    id,
                    message,
                }),
                None => trace!("overseer dropped, ignoring background result"),
            }
        });

        match self.gateway.run_in_background(task) {
            Ok(handle) => {
                self.executions.attach(owner, id, handle);
                debug!(state = %owner.state.name(), "background task started");
            }
            Err(source) => {
                self.executions.finish(owner, id);
                OverseerError::ScheduleTask {
                    state: owner.state.name().to_string(),
                    source,
                }
                .log();
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let timers = self.timers.cancel_all();
        let executions = self.executions.cancel_all();
        if timers + executions > 0 {
            debug!(timers, executions, "overseer dropped, cancelled outstanding async work");
        }
    }
}

fn same_entry(a: Option<&Arc<StackEntry>>, b: Option<&Arc<StackEntry>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.id() == b.id(),
        (None, None) => true,
        _ => false,
    }
}
