//! Transition results.
//!
//! A [`Next`] is what a state returns from a message handler or lifecycle
//! callback: a structural [`Transition`] for the stack plus an
//! [`AsyncUpdate`] attributed to the state that produced it. Auxiliary states
//! have no stack position of their own and return the narrower
//! [`AbsoluteNext`], which converts losslessly into a `Next`.
//!
//! Building a `Next` has no side effects. Nothing happens until the overseer
//! applies it.

use crate::async_update::{AsyncTask, AsyncUpdate, ExecuteAsync, TimerUpdate};
use crate::state::State;

/// Where a relative [`Transition::Start`] inserts the new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePosition {
    /// At the acting index, pushing the acting entry down.
    Above,
    /// Directly below the acting entry.
    Below,
}

/// Where an absolute start inserts the new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsolutePosition {
    /// Index 0.
    Top,
    /// The end of the stack.
    Bottom,
}

/// The region a [`Transition::Clear`] collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeRange {
    /// Everything above the acting entry, and the entry itself if inclusive.
    Above {
        /// Also clear the acting entry.
        inclusive: bool,
    },
    /// Everything below the acting entry, and the entry itself if inclusive.
    Below {
        /// Also clear the acting entry.
        inclusive: bool,
    },
}

impl RelativeRange {
    /// True if the acting entry is cleared too.
    pub fn inclusive(&self) -> bool {
        match self {
            RelativeRange::Above { inclusive } | RelativeRange::Below { inclusive } => *inclusive,
        }
    }
}

impl Default for RelativeRange {
    fn default() -> Self {
        RelativeRange::Below { inclusive: true }
    }
}

/// Structural change requested of the stack.
#[derive(Debug, Clone)]
pub enum Transition {
    /// No structural change.
    Stay,
    /// Replace the acting entry with a fresh entry for the state.
    Goto(State),
    /// Insert a fresh entry next to the acting entry.
    Start(State, RelativePosition),
    /// Remove the acting entry.
    Done,
    /// Collapse a region around the acting entry into one fresh entry.
    Clear(State, RelativeRange),
    /// Insert a fresh entry at the top or bottom of the whole stack.
    AbsoluteStart(State, AbsolutePosition),
    /// Replace the whole stack with one fresh entry.
    AbsoluteClear(State),
}

impl Transition {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Stay => "Stay",
            Transition::Goto(_) => "Goto",
            Transition::Start(..) => "Start",
            Transition::Done => "Done",
            Transition::Clear(..) => "Clear",
            Transition::AbsoluteStart(..) => "AbsoluteStart",
            Transition::AbsoluteClear(_) => "AbsoluteClear",
        }
    }

    /// True for transitions that need an acting entry.
    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            Transition::Goto(_) | Transition::Start(..) | Transition::Done | Transition::Clear(..)
        )
    }

    /// True if applying this transition removes the acting entry for good.
    pub(crate) fn discards_recipient(&self) -> bool {
        match self {
            Transition::Clear(_, range) => range.inclusive(),
            Transition::AbsoluteClear(_) => true,
            _ => false,
        }
    }
}

/// The subset of transitions an auxiliary state may request.
#[derive(Debug, Clone)]
pub enum AbsoluteTransition {
    /// No structural change.
    Stay,
    /// Insert a fresh entry at the top or bottom of the whole stack.
    Start(State, AbsolutePosition),
    /// Replace the whole stack with one fresh entry.
    Clear(State),
}

impl From<AbsoluteTransition> for Transition {
    fn from(transition: AbsoluteTransition) -> Self {
        match transition {
            AbsoluteTransition::Stay => Transition::Stay,
            AbsoluteTransition::Start(state, position) => Transition::AbsoluteStart(state, position),
            AbsoluteTransition::Clear(state) => Transition::AbsoluteClear(state),
        }
    }
}

/// Result of a primary state's handler or lifecycle callback.
#[derive(Debug, Clone)]
pub struct Next {
    transition: Transition,
    update: AsyncUpdate,
}

impl Next {
    /// Wrap a transition with no async work.
    pub fn new(transition: Transition) -> Self {
        Self {
            transition,
            update: AsyncUpdate::default(),
        }
    }

    /// No structural change.
    pub fn stay() -> Self {
        Self::new(Transition::Stay)
    }

    /// Replace the acting entry with `state`.
    pub fn goto(state: impl Into<State>) -> Self {
        Self::new(Transition::Goto(state.into()))
    }

    /// Start `state` above the acting entry.
    pub fn start(state: impl Into<State>) -> Self {
        Self::new(Transition::Start(state.into(), RelativePosition::Above))
    }

    /// Start `state` directly below the acting entry.
    pub fn start_below(state: impl Into<State>) -> Self {
        Self::new(Transition::Start(state.into(), RelativePosition::Below))
    }

    /// Remove the acting entry.
    pub fn done() -> Self {
        Self::new(Transition::Done)
    }

    /// Clear the acting entry and everything below it, replacing them with `state`.
    pub fn clear(state: impl Into<State>) -> Self {
        Self::clear_range(state, RelativeRange::default())
    }

    /// Clear `range` around the acting entry, replacing it with `state`.
    pub fn clear_range(state: impl Into<State>, range: RelativeRange) -> Self {
        Self::new(Transition::Clear(state.into(), range))
    }

    /// Start `state` at the top of the stack.
    pub fn absolute_start(state: impl Into<State>) -> Self {
        Self::new(Transition::AbsoluteStart(state.into(), AbsolutePosition::Top))
    }

    /// Start `state` at the bottom of the stack.
    pub fn absolute_start_bottom(state: impl Into<State>) -> Self {
        Self::new(Transition::AbsoluteStart(state.into(), AbsolutePosition::Bottom))
    }

    /// Replace the whole stack with `state`.
    pub fn absolute_clear(state: impl Into<State>) -> Self {
        Self::new(Transition::AbsoluteClear(state.into()))
    }

    /// The structural change.
    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    /// Async work attached to this result.
    pub fn update(&self) -> &AsyncUpdate {
        &self.update
    }

    pub(crate) fn into_parts(self) -> (Transition, AsyncUpdate) {
        (self.transition, self.update)
    }
}

/// Result of an auxiliary state's handler or `on_start`.
#[derive(Debug, Clone)]
pub struct AbsoluteNext {
    transition: AbsoluteTransition,
    update: AsyncUpdate,
}

impl AbsoluteNext {
    /// Wrap a transition with no async work.
    pub fn new(transition: AbsoluteTransition) -> Self {
        Self {
            transition,
            update: AsyncUpdate::default(),
        }
    }

    /// No structural change.
    pub fn stay() -> Self {
        Self::new(AbsoluteTransition::Stay)
    }

    /// Start `state` at the top of the stack.
    pub fn start(state: impl Into<State>) -> Self {
        Self::new(AbsoluteTransition::Start(state.into(), AbsolutePosition::Top))
    }

    /// Start `state` at the bottom of the stack.
    pub fn start_bottom(state: impl Into<State>) -> Self {
        Self::new(AbsoluteTransition::Start(state.into(), AbsolutePosition::Bottom))
    }

    /// Replace the whole stack with `state`.
    pub fn clear(state: impl Into<State>) -> Self {
        Self::new(AbsoluteTransition::Clear(state.into()))
    }

    /// The structural change.
    pub fn transition(&self) -> &AbsoluteTransition {
        &self.transition
    }

    /// Async work attached to this result.
    pub fn update(&self) -> &AsyncUpdate {
        &self.update
    }
}

impl From<AbsoluteNext> for Next {
    fn from(next: AbsoluteNext) -> Self {
        Self {
            transition: next.transition.into(),
            update: next.update,
        }
    }
}

impl Default for Next {
    fn default() -> Self {
        Self::stay()
    }
}

impl Default for AbsoluteNext {
    fn default() -> Self {
        Self::stay()
    }
}

macro_rules! async_builders {
    ($ty:ty) => {
        impl $ty {
            /// Attach a timer request. A later request for the same key wins.
            pub fn timer(mut self, update: impl Into<TimerUpdate>) -> Self {
                self.update = std::mem::take(&mut self.update).with_timer(update);
                self
            }

            /// Attach a background execution.
            pub fn execute(mut self, execution: ExecuteAsync) -> Self {
                self.update = std::mem::take(&mut self.update).with_execution(execution);
                self
            }

            /// Merge a prepared update into this result.
            pub fn with_async(mut self, update: AsyncUpdate) -> Self {
                self.update = std::mem::take(&mut self.update).merge(update);
                self
            }

            /// Attach a mixed list of timer requests and executions.
            pub fn async_tasks<I>(mut self, tasks: I) -> Self
            where
                I: IntoIterator,
                I::Item: Into<AsyncTask>,
            {
                self.update = tasks
                    .into_iter()
                    .fold(std::mem::take(&mut self.update), |acc, task| acc.with_task(task));
                self
            }
        }
    };
}

async_builders!(Next);
async_builders!(AbsoluteNext);
