//! # Overseer
//!
//! A hierarchical state-stack runtime where states decide, the overseer
//! applies transitions, and timers and background work route back to the
//! state that asked for them.
//!
//! ## Core Concepts
//!
//! - A **state** reacts to messages with a [`Next`]: a structural
//!   [`Transition`] for the stack plus an [`AsyncUpdate`] (timers, background
//!   executions).
//! - The **stack** holds states top first. Index 0 is focused.
//! - A primary state may chain **auxiliary** states beneath it. A message the
//!   primary declines falls through the chain; the first state that accepts
//!   it handles it.
//! - The **gateway** ([`AsyncGateway`]) is the only thing that sleeps or
//!   spawns. Results come back through the overseer's queue.
//!
//! ## Architecture
//!
//! ```text
//! handle_message / start / timer fire / task result
//!     │
//!     ▼
//! Pump (FIFO, one drainer) ─── busy? ──► enqueue and return
//!     │
//!     ▼ deliver
//! Engine
//!     ├─► dispatch: stack[i].chain, first match wins ──► Next
//!     ├─► apply: mutate stack, on_end / on_start cascade
//!     ├─► focus: on_focus_lost / on_focus_gained cascade
//!     └─► async update ──► AsyncGateway ──► callback ──► Pump
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One cascade at a time** - messages arriving mid-cascade are queued,
//!    never run nested
//! 2. **Async work belongs to its requester** - timer fires and task results
//!    go to the state that asked, wherever it sits now
//! 3. **Gone means gone** - work for a state that left the stack is dropped
//!    and its registrations are purged
//! 4. **Fresh occupancy** - every entry onto the stack is a new entry, even
//!    for a state value already on it
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use overseer::{ManualGateway, Next, Overseer, PrimaryState, Receive, SetSingleTimer};
//!
//! #[derive(Debug, Clone)]
//! struct Tick;
//!
//! struct Idle {
//!     receive: Receive<Next>,
//! }
//!
//! impl PrimaryState for Idle {
//!     fn receive(&self) -> &Receive<Next> {
//!         &self.receive
//!     }
//!
//!     fn on_start(&self) -> Next {
//!         Next::stay().timer(SetSingleTimer::new("tick", Duration::from_secs(1), Tick))
//!     }
//! }
//!
//! let gateway = Arc::new(ManualGateway::new());
//! let overseer = Overseer::new(gateway.clone());
//! overseer.start(Arc::new(Idle {
//!     receive: Receive::new().on(|_: &Tick| Next::done()),
//! }));
//!
//! gateway.advance(Duration::from_secs(1));
//! assert_eq!(overseer.stack_len(), 0);
//! ```

// Core modules
mod async_update;
mod engine;
mod error;
mod executions;
mod gateway;
mod message;
mod next;
mod overseer;
mod pump;
mod receive;
mod stack;
mod state;
mod timers;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export message types
pub use message::{Failure, Message};

// Re-export state types
pub use receive::Receive;
pub use state::{AuxiliaryState, PrimaryState, State};

// Re-export transition types
pub use next::{
    AbsoluteNext, AbsolutePosition, AbsoluteTransition, Next, RelativePosition, RelativeRange,
    Transition,
};

// Re-export async request types
pub use async_update::{
    AsyncTask, AsyncUpdate, CancelTimer, ExecuteAsync, SetPeriodicTimer, SetSingleTimer,
    TimerKey, TimerUpdate,
};

// Re-export gateway types
pub use gateway::{
    AsyncGateway, AsyncHandle, BackgroundTask, HandleStatus, ManualGateway, TimerCallback,
    TokioGateway,
};

// Re-export overseer types (primary entry point)
pub use overseer::{Overseer, OverseerBuilder, DEFAULT_MAX_CHAIN_DEPTH};

// Re-export error types
pub use error::{GatewayError, OverseerError, Severity};
