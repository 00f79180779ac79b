//! Status poller: the long-poll state machine.
//!
//! `Idle → WaitingInitialDelay → Polling → {Completed, Failed, TimedOut}`,
//! with `Cancelled` reachable from any non-terminal state. Every sleep and
//! every in-flight GET races the cancellation token, so nothing is sent once
//! a terminal state is reached.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskrelay_core::config::{FlowConfig, PollerConfig};
use taskrelay_core::error::{Result, TaskRelayError};
use taskrelay_core::types::{PollResult, PollStatus, PollerState, Progress, Task};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::normalize::first_element;
use crate::transport::Transport;

/// Timing knobs for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Wait before the first status check. The workflows behind these
    /// webhooks take minutes, so checking early only burns requests.
    pub initial_delay: Duration,
    /// Pause between consecutive status checks.
    pub interval: Duration,
    /// Status checks before giving up.
    pub max_attempts: u32,
    /// Per-request ceiling.
    pub request_timeout: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default(), None)
    }
}

impl PollTiming {
    /// Global poller settings with per-flow overrides applied.
    pub fn from_config(poller: &PollerConfig, flow: Option<&FlowConfig>) -> Self {
        let initial = flow
            .and_then(|f| f.initial_delay_secs)
            .unwrap_or(poller.initial_delay_secs);
        let interval = flow
            .and_then(|f| f.interval_secs)
            .unwrap_or(poller.interval_secs);
        let max_attempts = flow
            .and_then(|f| f.max_attempts)
            .unwrap_or(poller.max_attempts)
            .max(1);
        Self {
            initial_delay: Duration::from_secs(initial),
            interval: Duration::from_secs(interval),
            max_attempts,
            request_timeout: Duration::from_secs(poller.request_timeout_secs.max(1)),
        }
    }

    /// Worst-case wall time before a timeout is reported.
    pub fn budget(&self) -> Duration {
        self.initial_delay + self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Progress after `attempt` status checks: starts at 10, climbs linearly,
/// never passes 95 until the task completes.
pub fn progress_percent(attempt: u32, max_attempts: u32) -> u8 {
    let max = u64::from(max_attempts.max(1));
    let pct = 10 + 85 * u64::from(attempt) / max;
    pct.min(95) as u8
}

/// Drives one task from submission acknowledgement to a terminal state.
pub struct StatusPoller {
    transport: Arc<dyn Transport>,
    timing: PollTiming,
    progress: watch::Sender<Progress>,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn new(transport: Arc<dyn Transport>, timing: PollTiming) -> Self {
        let (progress, _) = watch::channel(Progress::idle(timing.max_attempts));
        Self {
            transport,
            timing,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Poll `task` with the full initial delay.
    pub async fn run(&self, task: &Task) -> Result<Value> {
        self.run_after(task, self.timing.initial_delay).await
    }

    /// Poll `task`, waiting `initial_delay` before the first check. Resolves
    /// with the task's `result` (null if the server sent none).
    pub async fn run_after(&self, task: &Task, initial_delay: Duration) -> Result<Value> {
        let max = self.timing.max_attempts;

        self.publish(PollerState::WaitingInitialDelay, 0);
        tracing::info!(
            "⏳ Task {} submitted, first status check in {}s",
            task.task_id,
            initial_delay.as_secs()
        );
        self.sleep(initial_delay).await?;

        for attempt in 1..=max {
            if attempt > 1 {
                self.sleep(self.timing.interval).await?;
            }
            self.publish(PollerState::Polling { attempt }, attempt);

            let checked = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                r = self.check(&task.status_url) => r,
            };

            match checked {
                Ok(poll) => match poll.status {
                    PollStatus::Completed => {
                        self.publish(PollerState::Completed, attempt);
                        tracing::info!(
                            "✅ Task {} completed after {attempt} checks",
                            task.task_id
                        );
                        return Ok(poll.result.unwrap_or(Value::Null));
                    }
                    PollStatus::Failed => {
                        self.publish(PollerState::Failed, attempt);
                        let message = poll.error.unwrap_or_else(|| "task failed".into());
                        tracing::warn!("❌ Task {} failed: {message}", task.task_id);
                        return Err(TaskRelayError::TaskFailed {
                            task_id: task.task_id.clone(),
                            message,
                        });
                    }
                    status if status.is_in_progress() => {
                        tracing::debug!(
                            "Task {} is {status} ({attempt}/{max})",
                            task.task_id
                        );
                    }
                    status => {
                        tracing::warn!(
                            "⚠️ Task {} reported unrecognized status '{status}', still polling",
                            task.task_id
                        );
                    }
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "⚠️ Task {} check {attempt}/{max} unreadable, retrying: {e}",
                        task.task_id
                    );
                }
                Err(e) => {
                    self.publish(PollerState::Failed, attempt);
                    tracing::warn!("❌ Task {} polling aborted: {e}", task.task_id);
                    return Err(e);
                }
            }
        }

        self.publish(PollerState::TimedOut, max);
        tracing::warn!(
            "⌛ Task {} gave no result after {max} checks",
            task.task_id
        );
        Err(TaskRelayError::Timeout {
            task_id: task.task_id.clone(),
            attempts: max,
        })
    }

    /// One status GET, classified. A 404 means the task record does not
    /// exist yet and reads as `NotFound`. Empty or non-JSON bodies come back
    /// as the transient `MalformedBody`.
    pub async fn check(&self, status_url: &str) -> Result<PollResult> {
        let reply = tokio::time::timeout(self.timing.request_timeout, self.transport.get(status_url))
            .await
            .map_err(|_| {
                TaskRelayError::Transport(format!(
                    "GET {status_url} timed out after {}s",
                    self.timing.request_timeout.as_secs()
                ))
            })??;

        if reply.status == 404 {
            return Ok(PollResult {
                status: PollStatus::NotFound,
                ..PollResult::default()
            });
        }
        if !reply.is_success() {
            return Err(TaskRelayError::HttpStatus {
                status: reply.status,
                body: reply.body_preview(),
            });
        }
        let value = first_element(reply.json()?);
        Ok(PollResult::from_value(&value))
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(self.cancelled())
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn cancelled(&self) -> TaskRelayError {
        self.publish(PollerState::Cancelled, self.progress().attempt);
        tracing::info!("🛑 Polling cancelled");
        TaskRelayError::Cancelled
    }

    fn publish(&self, state: PollerState, attempt: u32) {
        let max = self.timing.max_attempts;
        self.progress.send_modify(|p| {
            let target = match state {
                PollerState::Idle => 0,
                PollerState::WaitingInitialDelay => 5,
                PollerState::Polling { attempt } => progress_percent(attempt, max),
                PollerState::Completed => 100,
                PollerState::Failed | PollerState::TimedOut | PollerState::Cancelled => p.percent,
            };
            p.state = state;
            p.attempt = attempt;
            p.percent = p.percent.max(target);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    fn timing() -> PollTiming {
        PollTiming {
            initial_delay: Duration::from_secs(180),
            interval: Duration::from_secs(15),
            max_attempts: 80,
            request_timeout: Duration::from_secs(30),
        }
    }

    fn task() -> Task {
        Task::new("abc123", "http://hooks.test/task-status/abc123")
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut last = 0;
        for attempt in 0..=80 {
            let pct = progress_percent(attempt, 80);
            assert!(pct >= last);
            assert!(pct <= 95);
            last = pct;
        }
        assert_eq!(progress_percent(0, 80), 10);
        assert_eq!(progress_percent(80, 80), 95);
        assert_eq!(progress_percent(3, 0), 95);
    }

    #[test]
    fn test_timing_from_config_applies_overrides() {
        let mut flow = FlowConfig::new("t", "http://w", "http://s/{task_id}", "subject");
        flow.interval_secs = Some(5);
        flow.max_attempts = Some(3);
        let t = PollTiming::from_config(&PollerConfig::default(), Some(&flow));
        assert_eq!(t.initial_delay, Duration::from_secs(180));
        assert_eq!(t.interval, Duration::from_secs(5));
        assert_eq!(t.max_attempts, 3);
        assert_eq!(t.budget(), Duration::from_secs(190));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_waits_initial_delay() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(200, r#"{"status":"completed","result":{"title":"Cats!"}}"#);
        let poller = StatusPoller::new(transport.clone(), timing());

        let start = tokio::time::Instant::now();
        let result = poller.run(&task()).await.unwrap();
        assert_eq!(result, json!({"title": "Cats!"}));

        let gets = transport.get_calls();
        assert_eq!(gets.len(), 1);
        assert!(gets[0].at - start >= Duration::from_secs(180));
        assert_eq!(poller.progress().percent, 100);
        assert_eq!(poller.progress().state, PollerState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_completed_and_spaces_checks() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(200, r#"{"status":"pending"}"#);
        transport.push_get(200, r#"{"status":"processing"}"#);
        transport.push_get(200, r#"[{"status":"completed","result":"done"}]"#);
        transport.push_get(200, r#"{"status":"processing"}"#);
        let poller = StatusPoller::new(transport.clone(), timing());

        let result = poller.run(&task()).await.unwrap();
        assert_eq!(result, json!("done"));

        let gets = transport.get_calls();
        assert_eq!(gets.len(), 3);
        assert!(gets[1].at - gets[0].at >= Duration::from_secs(15));
        assert!(gets[2].at - gets[1].at >= Duration::from_secs(15));

        // Nothing else goes out afterwards.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.get_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_rejects_with_server_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(200, r#"{"status":"processing"}"#);
        transport.push_get(200, r#"{"status":"failed","error":"model overloaded"}"#);
        let poller = StatusPoller::new(transport.clone(), timing());

        let err = poller.run(&task()).await.unwrap_err();
        match err {
            TaskRelayError::TaskFailed { task_id, message } => {
                assert_eq!(task_id, "abc123");
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.get_calls().len(), 2);
        assert_eq!(poller.progress().state, PollerState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut t = timing();
        t.max_attempts = 4;
        let poller = StatusPoller::new(transport.clone(), t);

        let err = poller.run(&task()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskRelayError::Timeout { ref task_id, attempts: 4 } if task_id == "abc123"
        ));
        assert_eq!(transport.get_calls().len(), 4);
        let p = poller.progress();
        assert_eq!(p.state, PollerState::TimedOut);
        assert!(p.percent < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_replies_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(200, "");
        transport.push_get(200, "<html>502</html>");
        transport.push_get(404, "no such task");
        transport.push_get(200, r#"{"status":"warming_up"}"#);
        transport.push_get(200, r#"{"status":"completed","result":{"ok":true}}"#);
        let poller = StatusPoller::new(transport.clone(), timing());

        let result = poller.run(&task()).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(transport.get_calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(500, "boom");
        let poller = StatusPoller::new(transport.clone(), timing());

        let err = poller.run(&task()).await.unwrap_err();
        assert!(matches!(err, TaskRelayError::HttpStatus { status: 500, .. }));
        assert_eq!(transport.get_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get_error(TaskRelayError::Transport("connection refused".into()));
        let poller = StatusPoller::new(transport.clone(), timing());

        let err = poller.run(&task()).await.unwrap_err();
        assert!(matches!(err, TaskRelayError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_initial_delay_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let poller = Arc::new(StatusPoller::new(transport.clone(), timing()));
        let token = poller.cancellation_token();

        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run(&task()).await })
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        token.cancel();

        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(err, TaskRelayError::Cancelled));
        assert!(transport.get_calls().is_empty());
        assert_eq!(poller.progress().state, PollerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_check() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_get_delay(Duration::from_secs(20));
        transport.push_get(200, r#"{"status":"completed","result":"too late"}"#);
        let poller = Arc::new(StatusPoller::new(transport.clone(), timing()));
        let token = poller.cancellation_token();

        let start = tokio::time::Instant::now();
        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run(&task()).await })
        };
        // First GET starts at 180s and would answer at 200s.
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(transport.get_calls().len(), 1);
        token.cancel();

        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(err, TaskRelayError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(190));
        assert_eq!(poller.progress().state, PollerState::Cancelled);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.get_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_check_hits_request_timeout() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_get_delay(Duration::from_secs(45));
        let poller = StatusPoller::new(transport.clone(), timing());

        let start = tokio::time::Instant::now();
        let err = poller.run(&task()).await.unwrap_err();
        match err {
            TaskRelayError::Transport(msg) => assert!(msg.contains("timed out after 30s")),
            other => panic!("unexpected error: {other:?}"),
        }
        // 180s initial delay plus the 30s request ceiling.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(210));
        assert!(elapsed < Duration::from_secs(215));
        assert_eq!(transport.get_calls().len(), 1);
        assert_eq!(poller.progress().state, PollerState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_feed_reports_waiting_then_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(200, r#"{"status":"pending"}"#);
        transport.push_get(200, r#"{"status":"completed"}"#);
        let poller = Arc::new(StatusPoller::new(transport, timing()));
        let mut rx = poller.subscribe();

        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run(&task()).await })
        };

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, PollerState::WaitingInitialDelay);
        assert_eq!(rx.borrow().percent, 5);

        let result = runner.await.unwrap().unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(rx.borrow().percent, 100);
    }
}
