//! Wall-clock gateway backed by a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

use super::{AsyncGateway, AsyncHandle, BackgroundTask, HandleStatus, TimerCallback};
use crate::async_update::TimerKey;
use crate::error::GatewayError;
use crate::message::Message;

/// Handle to a spawned timer or blocking task.
struct TokioHandle {
    status: Arc<HandleStatus>,
    abort: AbortHandle,
}

impl AsyncHandle for TokioHandle {
    fn cancel(&self) -> bool {
        let cancelled = self.status.cancel();
        if cancelled {
            self.abort.abort();
        }
        cancelled
    }

    fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }

    fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

/// Gateway that runs timers as tokio tasks and background work on the
/// blocking pool.
///
/// Periodic timers use a fixed delay: the next wait starts after the
/// previous fire has been handed to the overseer. Timer callbacks run on a
/// runtime worker, so states should keep their handlers short and push
/// slow work into [`ExecuteAsync`](crate::ExecuteAsync).
#[derive(Debug, Clone)]
pub struct TokioGateway {
    handle: Handle,
}

impl TokioGateway {
    /// Use the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime this call is made from.
    pub fn current() -> Result<Self, GatewayError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| GatewayError::NoRuntime(e.to_string()))
    }
}

impl AsyncGateway for TokioGateway {
    fn schedule_once(
        &self,
        key: TimerKey,
        delay: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        let status = Arc::new(HandleStatus::default());
        let task_status = status.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_status.complete() {
                callback(key, message);
            } else {
                trace!(key = %key, "timer cancelled before firing");
            }
        });
        Ok(Arc::new(TokioHandle {
            status,
            abort: join.abort_handle(),
        }))
    }

    fn schedule_periodic(
        &self,
        key: TimerKey,
        initial_delay: Duration,
        period: Duration,
        message: Message,
        callback: TimerCallback,
    ) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        if period.is_zero() {
            return Err(GatewayError::ZeroPeriod { key }.into());
        }
        let status = Arc::new(HandleStatus::default());
        let task_status = status.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            while !task_status.is_done() {
                callback(key.clone(), message.clone());
                tokio::time::sleep(period).await;
            }
        });
        Ok(Arc::new(TokioHandle {
            status,
            abort: join.abort_handle(),
        }))
    }

    fn run_in_background(&self, task: BackgroundTask) -> anyhow::Result<Arc<dyn AsyncHandle>> {
        let status = Arc::new(HandleStatus::default());
        let task_status = status.clone();
        let join = self.handle.spawn_blocking(move || {
            if task_status.is_cancelled() {
                return;
            }
            task();
            task_status.complete();
        });
        Ok(Arc::new(TokioHandle {
            status,
            abort: join.abort_handle(),
        }))
    }
}
