//! State traits and the [`State`] handle the overseer stores on its stack.
//!
//! States are shared (`Arc`) and compared by identity, never by value: two
//! structurally equal states are still two states, and one state value
//! pushed twice occupies two independent stack entries. All callbacks take
//! `&self`; a state that needs to remember things uses interior mutability.

use std::fmt;
use std::sync::Arc;

use crate::message::Message;
use crate::next::{AbsoluteNext, Next};
use crate::receive::Receive;

/// A focus-aware state that can occupy any stack position.
pub trait PrimaryState: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Messages this state accepts.
    fn receive(&self) -> &Receive<Next>;

    /// Fallback state consulted for messages this state declines.
    fn auxiliary(&self) -> Option<Arc<dyn AuxiliaryState>> {
        None
    }

    /// Called when a fresh entry for this state joins the stack.
    fn on_start(&self) -> Next {
        Next::stay()
    }

    /// Called when this state's entry leaves the stack.
    fn on_end(&self) {}

    /// Called when this state's entry becomes the top of the stack.
    fn on_focus_gained(&self) -> Next {
        Next::stay()
    }

    /// Called when this state's entry stops being the top of the stack.
    fn on_focus_lost(&self) {}
}

/// A fallback state chained beneath a primary (or another auxiliary) state.
///
/// Auxiliaries have no stack position of their own, so they are limited to
/// absolute transitions and receive no focus callbacks.
pub trait AuxiliaryState: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Messages this state accepts.
    fn receive(&self) -> &Receive<AbsoluteNext>;

    /// The next fallback in the chain.
    fn auxiliary(&self) -> Option<Arc<dyn AuxiliaryState>> {
        None
    }

    /// Called when an entry for this state itself joins the stack. Not
    /// called for chain members reached through another entry.
    fn on_start(&self) -> AbsoluteNext {
        AbsoluteNext::stay()
    }

    /// Called when an entry for this state itself leaves the stack.
    fn on_end(&self) {}
}

/// Shared handle to either kind of state.
#[derive(Clone)]
pub enum State {
    /// A primary state.
    Primary(Arc<dyn PrimaryState>),
    /// An auxiliary state.
    Auxiliary(Arc<dyn AuxiliaryState>),
}

impl State {
    /// Wrap an auxiliary state. Primary states convert with `From`.
    pub fn auxiliary<S: AuxiliaryState>(state: Arc<S>) -> Self {
        State::Auxiliary(state)
    }

    /// Identity comparison.
    pub fn same(a: &State, b: &State) -> bool {
        a.addr() == b.addr()
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        match self {
            State::Primary(s) => s.name(),
            State::Auxiliary(s) => s.name(),
        }
    }

    /// The primary state, if this is one.
    pub fn as_primary(&self) -> Option<&Arc<dyn PrimaryState>> {
        match self {
            State::Primary(s) => Some(s),
            State::Auxiliary(_) => None,
        }
    }

    /// True if this wraps a primary state.
    pub fn is_primary(&self) -> bool {
        matches!(self, State::Primary(_))
    }

    /// Address of the shared state, used as its identity.
    pub(crate) fn addr(&self) -> usize {
        match self {
            State::Primary(s) => Arc::as_ptr(s) as *const () as usize,
            State::Auxiliary(s) => Arc::as_ptr(s) as *const () as usize,
        }
    }

    pub(crate) fn next_in_chain(&self) -> Option<State> {
        let aux = match self {
            State::Primary(s) => s.auxiliary(),
            State::Auxiliary(s) => s.auxiliary(),
        };
        aux.map(State::Auxiliary)
    }

    pub(crate) fn accepts(&self, message: &Message) -> bool {
        match self {
            State::Primary(s) => s.receive().is_defined_at(message),
            State::Auxiliary(s) => s.receive().is_defined_at(message),
        }
    }

    pub(crate) fn apply(&self, message: &Message) -> Option<Next> {
        match self {
            State::Primary(s) => s.receive().apply(message),
            State::Auxiliary(s) => s.receive().apply(message).map(Next::from),
        }
    }

    pub(crate) fn on_start(&self) -> Next {
        match self {
            State::Primary(s) => s.on_start(),
            State::Auxiliary(s) => s.on_start().into(),
        }
    }

    pub(crate) fn on_end(&self) {
        match self {
            State::Primary(s) => s.on_end(),
            State::Auxiliary(s) => s.on_end(),
        }
    }
}

impl<S: PrimaryState> From<Arc<S>> for State {
    fn from(state: Arc<S>) -> Self {
        State::Primary(state)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Primary(s) => write!(f, "Primary({})", s.name()),
            State::Auxiliary(s) => write!(f, "Auxiliary({})", s.name()),
        }
    }
}
