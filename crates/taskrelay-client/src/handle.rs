//! Cancellable handle to a running poll loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskrelay_core::error::{Result, TaskRelayError};
use taskrelay_core::types::{Progress, Task};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::poller::StatusPoller;

/// Owns one spawned poll loop.
///
/// Dropping the handle cancels the loop. Use [`TaskHandle::detach`] to leave
/// it running unattended.
pub struct TaskHandle {
    task: Task,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
    join: JoinHandle<Result<Value>>,
    cancel_on_drop: DropGuard,
}

impl TaskHandle {
    /// Spawn `poller` for `task`. `on_finish` runs inside the spawned task
    /// with the final outcome, whichever way the loop ends.
    pub fn spawn<F>(poller: StatusPoller, task: Task, initial_delay: Duration, on_finish: F) -> Self
    where
        F: FnOnce(&Task, &Result<Value>) + Send + 'static,
    {
        let cancel = poller.cancellation_token();
        let progress = poller.subscribe();
        let poller = Arc::new(poller);
        let task_for_loop = task.clone();

        let join = tokio::spawn(async move {
            let outcome = poller.run_after(&task_for_loop, initial_delay).await;
            on_finish(&task_for_loop, &outcome);
            outcome
        });

        Self {
            task,
            cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            progress,
            join,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    /// Latest published progress.
    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Independent progress feed.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Stop polling. Idempotent; no status request is sent afterwards.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("🛑 Cancelling task {}", self.task.task_id);
        }
        self.cancel.cancel();
    }

    /// Token that cancels this loop, for wiring into signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Give up ownership without cancelling. The loop keeps polling and
    /// its finish hook still runs.
    pub fn detach(self) -> Task {
        let TaskHandle {
            task,
            cancel_on_drop,
            ..
        } = self;
        cancel_on_drop.disarm();
        tracing::debug!("Detached from task {}", task.task_id);
        task
    }

    /// Wait for the loop's outcome. A loop that panicked or was aborted
    /// reports `Cancelled`. Dropping the returned future cancels the loop.
    pub async fn wait(self) -> Result<Value> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("⚠️ Poll loop for {} ended abnormally: {e}", self.task.task_id);
                Err(TaskRelayError::Cancelled)
            }
        }
    }
}
