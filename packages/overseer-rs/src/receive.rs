//! Ordered pattern tables that decide which messages a state accepts.
//!
//! A [`Receive`] is a list of cases. Each case has a guard and a handler; the
//! first case whose guard accepts the message wins. The overseer uses
//! [`Receive::is_defined_at`] to walk a state's auxiliary chain and only
//! calls [`Receive::apply`] on the state that accepts.
//!
//! # Example
//!
//! ```ignore
//! use overseer::{Next, Receive};
//!
//! #[derive(Debug, Clone)]
//! struct Tick;
//!
//! let receive: Receive<Next> = Receive::new()
//!     .on(|_: &Tick| Next::stay())
//!     .on_if(|n: &u32| *n > 10, |_| Next::done());
//! ```

use std::any::Any;
use std::fmt;

use crate::message::Message;

type Guard = Box<dyn Fn(&Message) -> bool + Send + Sync>;
type Handler<N> = Box<dyn Fn(&Message) -> Option<N> + Send + Sync>;

struct Case<N> {
    guard: Guard,
    handler: Handler<N>,
}

/// Ordered (guard, handler) table evaluated first-match-wins.
pub struct Receive<N> {
    cases: Vec<Case<N>>,
}

impl<N> Receive<N> {
    /// An empty table that accepts nothing.
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Accept every message whose payload is a `T`.
    pub fn on<T, F>(self, handler: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> N + Send + Sync + 'static,
    {
        self.on_if(|_: &T| true, handler)
    }

    /// Accept messages whose payload is a `T` and satisfies `predicate`.
    pub fn on_if<T, P, F>(mut self, predicate: P, handler: F) -> Self
    where
        T: Any,
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(&T) -> N + Send + Sync + 'static,
    {
        self.cases.push(Case {
            guard: Box::new(move |msg| msg.downcast_ref::<T>().is_some_and(&predicate)),
            handler: Box::new(move |msg| msg.downcast_ref::<T>().map(&handler)),
        });
        self
    }

    /// Accept messages by inspecting the raw [`Message`].
    pub fn on_message<P, F>(mut self, predicate: P, handler: F) -> Self
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(&Message) -> N + Send + Sync + 'static,
    {
        self.cases.push(Case {
            guard: Box::new(predicate),
            handler: Box::new(move |msg| Some(handler(msg))),
        });
        self
    }

    /// Append `fallback`'s cases after this table's.
    pub fn or_else(mut self, fallback: Receive<N>) -> Self {
        self.cases.extend(fallback.cases);
        self
    }

    /// True if some case accepts `message`.
    pub fn is_defined_at(&self, message: &Message) -> bool {
        self.cases.iter().any(|case| (case.guard)(message))
    }

    /// Run the first accepting case. `None` if no case accepts.
    pub fn apply(&self, message: &Message) -> Option<N> {
        self.cases
            .iter()
            .find(|case| (case.guard)(message))
            .and_then(|case| (case.handler)(message))
    }

    /// Number of cases in the table.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// True if the table has no cases.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl<N> Default for Receive<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> fmt::Debug for Receive<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receive")
            .field("cases", &self.cases.len())
            .finish()
    }
}
