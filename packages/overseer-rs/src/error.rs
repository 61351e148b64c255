//! Structured error types for the overseer and its gateways.
//!
//! # The Error Boundary Rule
//!
//! > **Routing misses and async failures never surface from `handle_message`.**
//!
//! - `OverseerError` describes what went wrong inside the engine. Values are
//!   built at the failure site and logged; the caller of `handle_message`
//!   never sees them.
//! - `GatewayError` is returned by the bundled gateways from their own
//!   driver-facing methods (`fire_timer`, `TokioGateway::current`, ...).
//! - `anyhow::Error` is the transport for user task failures and for
//!   scheduling failures at the [`AsyncGateway`](crate::AsyncGateway) seam.
//!
//! Panics raised by state callbacks on the dispatch path are not caught.

use thiserror::Error;

use crate::async_update::TimerKey;

/// How loudly an [`OverseerError`] should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected and routine (routing misses).
    Routine,
    /// Isolated failure that did not stop the cascade.
    Failure,
    /// Something that should never happen in a well-formed engine.
    Invariant,
}

/// Errors observed inside the overseer.
#[derive(Debug, Error)]
pub enum OverseerError {
    /// A message was addressed to a stack index that does not exist.
    #[error("index {index} out of bounds for stack of size {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Stack size at dispatch time.
        len: usize,
    },

    /// No state in the entry's chain accepts the message.
    #[error("message {message_type} unhandled by {state}")]
    Unhandled {
        /// Type name of the message.
        message_type: &'static str,
        /// Name of the entry's head state.
        state: String,
    },

    /// A relative transition was produced with nothing to act relative to.
    #[error("relative transition {transition} has no recipient")]
    MissingRecipient {
        /// Transition kind.
        transition: &'static str,
    },

    /// An async result arrived for a state that is no longer on the stack.
    #[error("{kind} for {state} has no owner on the stack")]
    OwnerGone {
        /// "timer" or "background task".
        kind: &'static str,
        /// Name of the state that requested the work.
        state: String,
    },

    /// The gateway refused to schedule a timer.
    #[error("failed to schedule timer {key} for {state}: {source}")]
    ScheduleTimer {
        /// Timer key.
        key: TimerKey,
        /// Requesting state.
        state: String,
        /// Gateway error.
        #[source]
        source: anyhow::Error,
    },

    /// The gateway refused to run a background task.
    #[error("failed to start background task for {state}: {source}")]
    ScheduleTask {
        /// Requesting state.
        state: String,
        /// Gateway error.
        #[source]
        source: anyhow::Error,
    },

    /// A failure mapper failed while mapping a task error.
    #[error("failure mapper for {state} failed ({secondary}) while mapping: {original}")]
    FailureMapper {
        /// Requesting state.
        state: String,
        /// The task's own error.
        original: String,
        /// The mapper's error.
        secondary: String,
    },
}

impl OverseerError {
    /// Severity used to pick the log level.
    pub fn severity(&self) -> Severity {
        match self {
            OverseerError::IndexOutOfBounds { .. } | OverseerError::Unhandled { .. } => {
                Severity::Routine
            }
            OverseerError::ScheduleTimer { .. }
            | OverseerError::ScheduleTask { .. }
            | OverseerError::FailureMapper { .. } => Severity::Failure,
            OverseerError::MissingRecipient { .. } | OverseerError::OwnerGone { .. } => {
                Severity::Invariant
            }
        }
    }

    /// Log this error at the level its severity calls for.
    pub(crate) fn log(&self) {
        match self.severity() {
            Severity::Routine => tracing::debug!(error = %self, "routing miss"),
            Severity::Failure => tracing::error!(error = %self, "async failure"),
            Severity::Invariant => tracing::error!(error = %self, "invariant violation"),
        }
    }
}

/// Errors returned by the bundled gateways.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `TokioGateway::current` was called outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Periodic timers need a non-zero period.
    #[error("periodic timer {key} has a zero period")]
    ZeroPeriod {
        /// Timer key.
        key: TimerKey,
    },

    /// `fire_timer` found no timer for the key.
    #[error("timer {key} is not scheduled")]
    TimerNotScheduled {
        /// Timer key.
        key: TimerKey,
    },

    /// `fire_timer` found the timer, but it was cancelled.
    #[error("timer {key} was cancelled")]
    TimerCancelled {
        /// Timer key.
        key: TimerKey,
    },

    /// `run_task` was given an index past the pending list.
    #[error("no pending background task at index {index} ({pending} pending)")]
    NoSuchTask {
        /// Requested index.
        index: usize,
        /// Pending task count.
        pending: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_out_of_bounds_display() {
        let err = OverseerError::IndexOutOfBounds { index: 4, len: 2 };
        assert!(err.to_string().contains("index 4"));
        assert!(err.to_string().contains("size 2"));
        assert_eq!(err.severity(), Severity::Routine);
    }

    #[test]
    fn test_schedule_failure_keeps_source() {
        let err = OverseerError::ScheduleTimer {
            key: TimerKey::from("t1"),
            state: "Idle".into(),
            source: anyhow::anyhow!("no timer for you"),
        };
        assert!(err.to_string().contains("t1"));
        assert!(err.to_string().contains("no timer for you"));
        assert_eq!(err.severity(), Severity::Failure);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invariant_errors_are_pattern_matchable() {
        let err = OverseerError::OwnerGone {
            kind: "timer",
            state: "Polling".into(),
        };
        match &err {
            OverseerError::OwnerGone { kind, .. } => assert_eq!(*kind, "timer"),
            _ => panic!("Expected OwnerGone"),
        }
        assert_eq!(err.severity(), Severity::Invariant);
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::TimerCancelled {
            key: TimerKey::from("poll"),
        };
        assert!(err.to_string().contains("poll"));
        assert!(err.to_string().contains("cancelled"));

        let err = GatewayError::NoSuchTask {
            index: 3,
            pending: 1,
        };
        assert!(err.to_string().contains("index 3"));
    }
}
