//! Fixture states for exercising an overseer.
//!
//! Enable with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! overseer = { path = "../overseer-rs", features = ["testing"] }
//! ```
//!
//! A [`ProbeState`] does three things:
//!
//! - replays any [`Next`] it receives as a message, so a test can drive the
//!   stack with `overseer.handle_message(Next::start(s2))`;
//! - records every other message it accepts (optionally only one type);
//! - counts its lifecycle callbacks.
//!
//! [`ProbeAuxiliary`] is the same for auxiliary states, replaying
//! [`AbsoluteNext`] instead.
//!
//! # Example
//!
//! ```ignore
//! let s1 = ProbeState::named("1");
//! let overseer = Overseer::new(Arc::new(ManualGateway::new()));
//! overseer.start(s1.clone());
//!
//! let s2 = ProbeState::named("2");
//! overseer.handle_message(Next::goto(s2.clone()));
//! assert_stack(&overseer, &[&s2]);
//! assert_eq!(s1.counts(), Counts::new(1, 1, 1, 1));
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::Message;
use crate::next::{AbsoluteNext, Next};
use crate::overseer::Overseer;
use crate::receive::Receive;
use crate::state::{AuxiliaryState, PrimaryState, State};

/// Lifecycle callback counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    /// `on_start` calls.
    pub start: usize,
    /// `on_end` calls.
    pub end: usize,
    /// `on_focus_gained` calls.
    pub focus_gained: usize,
    /// `on_focus_lost` calls.
    pub focus_lost: usize,
}

impl Counts {
    /// Counts in callback order: start, end, focus gained, focus lost.
    pub fn new(start: usize, end: usize, focus_gained: usize, focus_lost: usize) -> Self {
        Self {
            start,
            end,
            focus_gained,
            focus_lost,
        }
    }
}

type EventLog = Arc<Mutex<Vec<Message>>>;

fn recorder<N: 'static>(events: &EventLog, intercept: Option<TypeId>, stay: fn() -> N) -> Receive<N> {
    let sink = events.clone();
    Receive::new().on_message(
        move |msg| intercept.map_or(true, |t| msg.payload_type_id() == t),
        move |msg| {
            sink.lock().push(msg.clone());
            stay()
        },
    )
}

fn typed_events<T: Any + Clone>(events: &EventLog) -> Vec<T> {
    events
        .lock()
        .iter()
        .filter_map(|m| m.downcast_ref::<T>().cloned())
        .collect()
}

// =============================================================================
// Primary probe
// =============================================================================

/// A primary state that replays `Next` messages and records the rest.
pub struct ProbeState {
    name: String,
    receive: Receive<Next>,
    auxiliary: Option<Arc<dyn AuxiliaryState>>,
    on_start: Next,
    on_focus_gained: Next,
    counts: Mutex<Counts>,
    events: EventLog,
}

impl ProbeState {
    /// A probe with default callbacks that records every message.
    pub fn named(name: &str) -> Arc<Self> {
        Self::builder(name).build()
    }

    /// Configure a probe.
    pub fn builder(name: &str) -> ProbeBuilder {
        ProbeBuilder {
            name: name.to_string(),
            on_start: Next::stay(),
            on_focus_gained: Next::stay(),
            intercept: None,
            auxiliary: None,
        }
    }

    /// Lifecycle counts so far.
    pub fn counts(&self) -> Counts {
        *self.counts.lock()
    }

    /// Every recorded message, oldest first.
    pub fn events(&self) -> Vec<Message> {
        self.events.lock().clone()
    }

    /// Recorded messages whose payload is a `T`.
    pub fn events_of<T: Any + Clone>(&self) -> Vec<T> {
        typed_events(&self.events)
    }
}

impl PrimaryState for ProbeState {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self) -> &Receive<Next> {
        &self.receive
    }

    fn auxiliary(&self) -> Option<Arc<dyn AuxiliaryState>> {
        self.auxiliary.clone()
    }

    fn on_start(&self) -> Next {
        self.counts.lock().start += 1;
        self.on_start.clone()
    }

    fn on_end(&self) {
        self.counts.lock().end += 1;
    }

    fn on_focus_gained(&self) -> Next {
        self.counts.lock().focus_gained += 1;
        self.on_focus_gained.clone()
    }

    fn on_focus_lost(&self) {
        self.counts.lock().focus_lost += 1;
    }
}

/// Builder for [`ProbeState`].
pub struct ProbeBuilder {
    name: String,
    on_start: Next,
    on_focus_gained: Next,
    intercept: Option<TypeId>,
    auxiliary: Option<Arc<dyn AuxiliaryState>>,
}

impl ProbeBuilder {
    /// Result returned from every `on_start`.
    pub fn on_start(mut self, next: Next) -> Self {
        self.on_start = next;
        self
    }

    /// Result returned from every `on_focus_gained`.
    pub fn on_focus_gained(mut self, next: Next) -> Self {
        self.on_focus_gained = next;
        self
    }

    /// Only accept (and record) messages of type `T`, besides `Next`.
    pub fn intercept<T: Any>(mut self) -> Self {
        self.intercept = Some(TypeId::of::<T>());
        self
    }

    /// Chain an auxiliary state beneath the probe.
    pub fn auxiliary<A: AuxiliaryState>(mut self, auxiliary: Arc<A>) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn build(self) -> Arc<ProbeState> {
        let events = EventLog::default();
        let receive = Receive::new()
            .on(|next: &Next| next.clone())
            .or_else(recorder(&events, self.intercept, Next::stay));
        Arc::new(ProbeState {
            name: self.name,
            receive,
            auxiliary: self.auxiliary,
            on_start: self.on_start,
            on_focus_gained: self.on_focus_gained,
            counts: Mutex::new(Counts::default()),
            events,
        })
    }
}

// =============================================================================
// Auxiliary probe
// =============================================================================

/// An auxiliary state that replays `AbsoluteNext` messages and records the rest.
pub struct ProbeAuxiliary {
    name: String,
    receive: Receive<AbsoluteNext>,
    auxiliary: Option<Arc<dyn AuxiliaryState>>,
    on_start: AbsoluteNext,
    counts: Mutex<Counts>,
    events: EventLog,
}

impl ProbeAuxiliary {
    /// An auxiliary probe that records every message.
    pub fn named(name: &str) -> Arc<Self> {
        Self::builder(name).build()
    }

    /// Configure an auxiliary probe.
    pub fn builder(name: &str) -> ProbeAuxiliaryBuilder {
        ProbeAuxiliaryBuilder {
            name: name.to_string(),
            on_start: AbsoluteNext::stay(),
            intercept: None,
            auxiliary: None,
        }
    }

    /// Lifecycle counts so far. Focus counts stay zero.
    pub fn counts(&self) -> Counts {
        *self.counts.lock()
    }

    /// Every recorded message, oldest first.
    pub fn events(&self) -> Vec<Message> {
        self.events.lock().clone()
    }

    /// Recorded messages whose payload is a `T`.
    pub fn events_of<T: Any + Clone>(&self) -> Vec<T> {
        typed_events(&self.events)
    }
}

impl AuxiliaryState for ProbeAuxiliary {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self) -> &Receive<AbsoluteNext> {
        &self.receive
    }

    fn auxiliary(&self) -> Option<Arc<dyn AuxiliaryState>> {
        self.auxiliary.clone()
    }

    fn on_start(&self) -> AbsoluteNext {
        self.counts.lock().start += 1;
        self.on_start.clone()
    }

    fn on_end(&self) {
        self.counts.lock().end += 1;
    }
}

/// Builder for [`ProbeAuxiliary`].
pub struct ProbeAuxiliaryBuilder {
    name: String,
    on_start: AbsoluteNext,
    intercept: Option<TypeId>,
    auxiliary: Option<Arc<dyn AuxiliaryState>>,
}

impl ProbeAuxiliaryBuilder {
    /// Result returned from every `on_start`.
    pub fn on_start(mut self, next: AbsoluteNext) -> Self {
        self.on_start = next;
        self
    }

    /// Only accept (and record) messages of type `T`, besides `AbsoluteNext`.
    pub fn intercept<T: Any>(mut self) -> Self {
        self.intercept = Some(TypeId::of::<T>());
        self
    }

    /// Chain another auxiliary beneath this one.
    pub fn auxiliary<A: AuxiliaryState>(mut self, auxiliary: Arc<A>) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn build(self) -> Arc<ProbeAuxiliary> {
        let events = EventLog::default();
        let receive = Receive::new()
            .on(|next: &AbsoluteNext| next.clone())
            .or_else(recorder(&events, self.intercept, AbsoluteNext::stay));
        Arc::new(ProbeAuxiliary {
            name: self.name,
            receive,
            auxiliary: self.auxiliary,
            on_start: self.on_start,
            counts: Mutex::new(Counts::default()),
            events,
        })
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Names of the states on the stack, top first.
pub fn stack_names(overseer: &Overseer) -> Vec<String> {
    overseer
        .current_stack()
        .iter()
        .map(|s| s.name().to_string())
        .collect()
}

/// Assert the stack holds exactly `expected`, top first, by identity.
#[track_caller]
pub fn assert_stack(overseer: &Overseer, expected: &[&Arc<ProbeState>]) {
    let actual = overseer.current_stack();
    let matches = actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| State::same(a, &State::from((*e).clone())));
    assert!(
        matches,
        "stack mismatch: expected {:?}, got {:?}",
        expected.iter().map(|e| e.name()).collect::<Vec<_>>(),
        stack_names(overseer)
    );
}
