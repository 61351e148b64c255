//! In-flight background executions and how their results become messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::async_update::ExecuteAsync;
use crate::error::OverseerError;
use crate::gateway::AsyncHandle;
use crate::message::{Failure, Message};
use crate::timers::Owner;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one background execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registry of background executions that have not reported back yet.
#[derive(Default)]
pub(crate) struct ExecutionRegistry {
    tasks: DashMap<(Owner, TaskId), Option<Arc<dyn AsyncHandle>>>,
}

impl ExecutionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track an execution before handing it to the gateway.
    pub(crate) fn reserve(&self, owner: &Owner) -> TaskId {
        let id = TaskId::next();
        self.tasks.insert((owner.clone(), id), None);
        id
    }

    pub(crate) fn attach(&self, owner: &Owner, id: TaskId, handle: Arc<dyn AsyncHandle>) {
        if let Some(mut slot) = self.tasks.get_mut(&(owner.clone(), id)) {
            *slot = Some(handle);
        }
    }

    /// Stop tracking `id`. False if it was purged or never tracked.
    pub(crate) fn finish(&self, owner: &Owner, id: TaskId) -> bool {
        self.tasks.remove(&(owner.clone(), id)).is_some()
    }

    /// Cancel and forget every execution of `owner`.
    pub(crate) fn purge(&self, owner: &Owner) -> usize {
        let mut handles = Vec::new();
        let mut removed = 0;
        self.tasks.retain(|(o, _), handle| {
            if o == owner {
                handles.extend(handle.take());
                removed += 1;
                false
            } else {
                true
            }
        });
        for handle in handles {
            handle.cancel();
        }
        removed
    }

    /// Cancel and forget every execution.
    pub(crate) fn cancel_all(&self) -> usize {
        let handles: Vec<_> = self
            .tasks
            .iter_mut()
            .filter_map(|mut handle| handle.value_mut().take())
            .collect();
        let removed = self.tasks.len();
        self.tasks.clear();
        for handle in handles {
            handle.cancel();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Run `execution` and produce the message to deliver.
///
/// Success delivers the task's value. Failure delivers the failure mapper's
/// value, or `Failure(original)` if there is no mapper or the mapper fails.
pub(crate) fn run_to_message(execution: &ExecuteAsync, state: &str) -> Message {
    let cause = match execution.run() {
        Ok(message) => return message,
        Err(cause) => cause,
    };

    tracing::debug!(state = %state, error = %cause, "background task failed");

    match execution.map_failure(cause.clone()) {
        None => Message::new(Failure::new(cause)),
        Some(Ok(message)) => message,
        Some(Err(secondary)) => {
            OverseerError::FailureMapper {
                state: state.to_string(),
                original: cause.to_string(),
                secondary: secondary.to_string(),
            }
            .log();
            Message::new(Failure::new(cause))
        }
    }
}
