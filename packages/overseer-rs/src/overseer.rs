//! The public facade: an [`Overseer`] owns one stack and one pump.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use overseer::{ManualGateway, Overseer, OverseerBuilder};
//!
//! let gateway = Arc::new(ManualGateway::new());
//! let overseer = OverseerBuilder::new(gateway.clone())
//!     .with_max_chain_depth(8)
//!     .with_initial_state(Arc::new(Idle::default()))
//!     .build();
//!
//! overseer.handle_message(Tick);
//! gateway.advance(Duration::from_secs(1));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::gateway::AsyncGateway;
use crate::message::Message;
use crate::pump::{Envelope, Pump};
use crate::state::State;

/// Default bound on an auxiliary chain's length.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 64;

/// What gateway callbacks reach through their weak reference.
pub(crate) struct Shared {
    engine: Engine,
    pump: Pump,
}

impl Shared {
    /// Queue `envelope`; drain if nobody else is.
    pub(crate) fn submit(&self, envelope: Envelope) {
        self.pump.submit(envelope, |next| self.engine.deliver(next));
    }
}

/// Handle to a state stack.
///
/// Cloning is cheap and every clone drives the same stack. All entry points
/// are fire-and-forget: a call made while another call is mid-cascade (from
/// a state handler, or from a timer on another thread) is queued and
/// processed after that cascade settles, in arrival order.
#[derive(Clone)]
pub struct Overseer {
    shared: Arc<Shared>,
}

impl Overseer {
    /// An empty overseer with default settings.
    pub fn new(gateway: Arc<dyn AsyncGateway>) -> Self {
        OverseerBuilder::new(gateway).build()
    }

    /// Configure an overseer.
    pub fn builder(gateway: Arc<dyn AsyncGateway>) -> OverseerBuilder {
        OverseerBuilder::new(gateway)
    }

    /// Put `state` on top of the stack.
    pub fn start(&self, state: impl Into<State>) {
        let state = state.into();
        debug!(state = %state.name(), "start requested");
        self.shared.submit(Envelope::Start(state));
    }

    /// Offer `message` to the top entry.
    pub fn handle_message<M: Any + Send + Sync>(&self, message: M) {
        self.handle_message_at(message, 0);
    }

    /// Offer `message` to the entry at `index` (0 is the top).
    ///
    /// An index past the end is logged and dropped.
    pub fn handle_message_at<M: Any + Send + Sync>(&self, message: M, index: usize) {
        self.shared.submit(Envelope::Message {
            message: Message::new(message),
            index,
        });
    }

    /// Snapshot of the stack, top first.
    pub fn current_stack(&self) -> Vec<State> {
        self.shared.engine.states()
    }

    /// Number of entries on the stack.
    pub fn stack_len(&self) -> usize {
        self.shared.engine.len()
    }

    /// Timers registered and not yet fired, cancelled or purged.
    pub fn pending_timers(&self) -> usize {
        self.shared.engine.pending_timers()
    }

    /// Background executions whose results have not been delivered yet.
    pub fn pending_executions(&self) -> usize {
        self.shared.engine.pending_executions()
    }
}

impl fmt::Debug for Overseer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overseer")
            .field("stack", &self.current_stack())
            .field("pending_timers", &self.pending_timers())
            .field("pending_executions", &self.pending_executions())
            .finish()
    }
}

/// Builder for an [`Overseer`].
pub struct OverseerBuilder {
    gateway: Arc<dyn AsyncGateway>,
    max_chain_depth: usize,
    initial_state: Option<State>,
}

impl OverseerBuilder {
    /// Start from defaults, scheduling through `gateway`.
    pub fn new(gateway: Arc<dyn AsyncGateway>) -> Self {
        Self {
            gateway,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            initial_state: None,
        }
    }

    /// Truncate auxiliary chains longer than `depth`.
    ///
    /// Chains are also cut at the first repeated state.
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth.max(1);
        self
    }

    /// Start `state` as soon as the overseer is built.
    pub fn with_initial_state(mut self, state: impl Into<State>) -> Self {
        self.initial_state = Some(state.into());
        self
    }

    /// Build the overseer, starting the initial state if one was given.
    pub fn build(self) -> Overseer {
        let max_chain_depth = self.max_chain_depth;
        let gateway = self.gateway;
        let shared = Arc::new_cyclic(|weak| Shared {
            engine: Engine::new(gateway, max_chain_depth, weak.clone()),
            pump: Pump::new(),
        });
        info!(
            max_chain_depth,
            initial_state = self.initial_state.as_ref().map(|s| s.name()),
            "overseer created"
        );

        let overseer = Overseer { shared };
        if let Some(state) = self.initial_state {
            overseer.start(state);
        }
        overseer
    }
}

impl fmt::Debug for OverseerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverseerBuilder")
            .field("max_chain_depth", &self.max_chain_depth)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}
