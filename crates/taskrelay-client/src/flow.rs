//! Task flows: one parameterized submit → poll → project pipeline.
//!
//! Title, content and image-prompt generation differ only in webhook URL,
//! payload field and result mapping, so each is a configured [`TaskFlow`]
//! rather than its own copy of the state machine.
//!
//! ```text
//! TaskFlow::start(content)
//!   ├── single-flight guard (Busy if a task is active)
//!   ├── TaskSubmitter::submit → Completed(result) → project → done
//!   └── Async(task) → SnapshotStore "task:<flow>"
//!                   → TaskHandle (StatusPoller in a tokio task)
//!                   → on finish: release guard, drop snapshot,
//!                     cache "result:<flow>", notify
//! ```
//!
//! Dropping the returned [`TaskHandle`] or calling [`TaskFlow::reset`]
//! cancels the loop and frees the flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use taskrelay_core::config::{FlowConfig, PollerConfig, TASK_ID_PLACEHOLDER};
use taskrelay_core::error::{Result, TaskRelayError};
use taskrelay_core::types::{PollResult, SubmitOutcome, Task};
use tokio_util::sync::CancellationToken;

use crate::handle::TaskHandle;
use crate::notify::{NotificationCenter, NotifyLevel};
use crate::poller::{PollTiming, StatusPoller};
use crate::projector::{FieldMapping, ViewModel, project};
use crate::store::SnapshotStore;
use crate::submit::TaskSubmitter;
use crate::transport::{ReqwestTransport, Transport};

/// Built-in flow profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowProfile {
    Title,
    Content,
    ImagePrompt,
}

impl FlowProfile {
    pub fn name(&self) -> &'static str {
        match self {
            FlowProfile::Title => "title",
            FlowProfile::Content => "content",
            FlowProfile::ImagePrompt => "image-prompt",
        }
    }

    pub fn payload_field(&self) -> &'static str {
        match self {
            FlowProfile::Title => "subject",
            FlowProfile::Content => "title",
            FlowProfile::ImagePrompt => "content",
        }
    }

    pub fn mapping(&self) -> FieldMapping {
        match self {
            FlowProfile::Title => FieldMapping::title(),
            FlowProfile::Content => FieldMapping::content(),
            FlowProfile::ImagePrompt => FieldMapping::image_prompt(),
        }
    }
}

/// What [`TaskFlow::start`] produced.
pub enum FlowStart {
    /// The webhook answered inline; nothing is polling.
    Completed(ViewModel),
    /// A poll loop is running for the accepted task.
    Polling(TaskHandle),
}

pub struct TaskFlowBuilder {
    name: String,
    webhook_url: Option<String>,
    status_url_template: Option<String>,
    payload_field: String,
    timing: PollTiming,
    mapping: FieldMapping,
    store: Option<SnapshotStore>,
    notifications: Option<NotificationCenter>,
    transport: Option<Arc<dyn Transport>>,
}

impl TaskFlowBuilder {
    pub fn webhook_url(mut self, url: &str) -> Self {
        self.webhook_url = Some(url.to_string());
        self
    }

    /// Status endpoint with a `{task_id}` placeholder.
    pub fn status_url_template(mut self, template: &str) -> Self {
        self.status_url_template = Some(template.to_string());
        self
    }

    pub fn payload_field(mut self, field: &str) -> Self {
        self.payload_field = field.to_string();
        self
    }

    pub fn timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Payload field and mapping from a built-in profile.
    pub fn profile(self, profile: FlowProfile) -> Self {
        self.payload_field(profile.payload_field())
            .mapping(profile.mapping())
    }

    pub fn store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifications(mut self, center: NotificationCenter) -> Self {
        self.notifications = Some(center);
        self
    }

    /// Defaults to a [`ReqwestTransport`] using the timing's request timeout.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<TaskFlow> {
        let webhook_url = self
            .webhook_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                TaskRelayError::Config(format!("flow '{}' has no webhook URL", self.name))
            })?;
        let template = self
            .status_url_template
            .filter(|t| t.contains(TASK_ID_PLACEHOLDER))
            .ok_or_else(|| {
                TaskRelayError::Config(format!(
                    "flow '{}' needs a status URL template containing {TASK_ID_PLACEHOLDER}",
                    self.name
                ))
            })?;
        if self.payload_field.trim().is_empty() {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' has an empty payload field",
                self.name
            )));
        }
        if self.timing.max_attempts == 0 {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' max_attempts must be at least 1",
                self.name
            )));
        }
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(self.timing.request_timeout)?),
        };

        let submitter = TaskSubmitter::new(
            transport.clone(),
            &webhook_url,
            &template,
            &self.payload_field,
        );

        Ok(TaskFlow {
            inner: Arc::new(FlowInner {
                name: self.name,
                submitter,
                transport,
                timing: self.timing,
                mapping: self.mapping,
                store: self.store,
                notifications: self.notifications,
                busy: AtomicBool::new(false),
                active: Mutex::new(None),
            }),
        })
    }
}

struct FlowInner {
    name: String,
    submitter: TaskSubmitter,
    transport: Arc<dyn Transport>,
    timing: PollTiming,
    mapping: FieldMapping,
    store: Option<SnapshotStore>,
    notifications: Option<NotificationCenter>,
    busy: AtomicBool,
    /// Cancels the running poll loop, if any.
    active: Mutex<Option<CancellationToken>>,
}

impl FlowInner {
    fn task_key(&self) -> String {
        format!("task:{}", self.name)
    }

    fn result_key(&self) -> String {
        format!("result:{}", self.name)
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forget_task(&self) {
        if let Some(store) = &self.store {
            store.remove(&self.task_key());
        }
    }

    fn remember(&self, task: &Task) {
        if let Some(store) = &self.store
            && let Err(e) = store.put(&self.task_key(), task)
        {
            tracing::warn!("⚠️ Could not mirror task {}: {e}", task.task_id);
        }
    }

    fn completed(&self, result: &Value) -> ViewModel {
        if let Some(store) = &self.store
            && let Err(e) = store.put(&self.result_key(), result)
        {
            tracing::warn!("⚠️ Could not cache result for '{}': {e}", self.name);
        }
        let view = project(result, &self.mapping);
        if let Some(center) = &self.notifications {
            let summary = view.title.clone().unwrap_or_else(|| "result ready".into());
            center.push(
                NotifyLevel::Success,
                &format!("{} completed", self.name),
                &summary,
                &self.name,
            );
        }
        view
    }

    fn failed(&self, err: &TaskRelayError) {
        let Some(center) = &self.notifications else {
            return;
        };
        let level = match err {
            TaskRelayError::Cancelled => NotifyLevel::Info,
            TaskRelayError::Timeout { .. } => NotifyLevel::Warning,
            _ => NotifyLevel::Error,
        };
        center.push(level, &format!("{} failed", self.name), &err.to_string(), &self.name);
    }

    /// Runs once per poll loop, inside the spawned task.
    fn settle(&self, task: &Task, outcome: &Result<Value>) {
        *self.active() = None;
        self.forget_task();
        match outcome {
            Ok(result) => {
                self.completed(result);
            }
            Err(e) => {
                tracing::info!("Task {} for '{}' ended: {e}", task.task_id, self.name);
                self.failed(e);
            }
        }
    }
}

/// Releases the single-flight slot when dropped.
struct BusyGuard(Arc<FlowInner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// A configured submit/poll/project pipeline. Cheap to clone; clones share
/// the single-flight slot.
#[derive(Clone)]
pub struct TaskFlow {
    inner: Arc<FlowInner>,
}

impl TaskFlow {
    pub fn builder(name: &str) -> TaskFlowBuilder {
        TaskFlowBuilder {
            name: name.to_string(),
            webhook_url: None,
            status_url_template: None,
            payload_field: "content".into(),
            timing: PollTiming::default(),
            mapping: FieldMapping::for_profile(name),
            store: None,
            notifications: None,
            transport: None,
        }
    }

    /// Builder preloaded from a `[[flows]]` entry.
    pub fn builder_from_config(flow: &FlowConfig, poller: &PollerConfig) -> TaskFlowBuilder {
        let mapping = FieldMapping::for_profile(flow.profile_name())
            .with_overrides(&flow.title_fields, &flow.report_fields);
        Self::builder(&flow.name)
            .webhook_url(&flow.webhook_url)
            .status_url_template(&flow.status_url_template)
            .payload_field(&flow.payload_field)
            .timing(PollTiming::from_config(poller, Some(flow)))
            .mapping(mapping)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn timing(&self) -> &PollTiming {
        &self.inner.timing
    }

    /// Whether a task is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<BusyGuard> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                tracing::warn!("⚠️ '{}' is busy, rejecting duplicate submission", self.inner.name);
                TaskRelayError::Busy(self.inner.name.clone())
            })?;
        Ok(BusyGuard(self.inner.clone()))
    }

    /// Submit `content`. Rejected with `Busy` while another task of this
    /// flow is active.
    pub async fn start(&self, content: &str) -> Result<FlowStart> {
        let guard = self.acquire()?;

        let outcome = match self.inner.submitter.submit(content).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("❌ '{}' submission failed: {e}", self.inner.name);
                self.inner.failed(&e);
                return Err(e);
            }
        };

        match outcome {
            SubmitOutcome::Completed(result) => Ok(FlowStart::Completed(self.inner.completed(&result))),
            SubmitOutcome::Async(task) => {
                self.inner.remember(&task);
                let delay = self.inner.timing.initial_delay;
                Ok(FlowStart::Polling(self.spawn(task, delay, guard)))
            }
        }
    }

    /// Submit and wait for the projected result.
    pub async fn run(&self, content: &str) -> Result<ViewModel> {
        match self.start(content).await? {
            FlowStart::Completed(view) => Ok(view),
            FlowStart::Polling(handle) => {
                let result = handle.wait().await?;
                Ok(self.project(&result))
            }
        }
    }

    /// Re-attach to a task accepted earlier. Only the part of the initial
    /// delay that has not yet elapsed since `task.created_at` is waited.
    pub fn resume(&self, task: Task) -> Result<TaskHandle> {
        let guard = self.acquire()?;
        let remaining = self.inner.timing.initial_delay.saturating_sub(task.age());
        tracing::info!(
            "🔄 Resuming task {} for '{}' (first check in {}s)",
            task.task_id,
            self.inner.name,
            remaining.as_secs()
        );
        self.inner.remember(&task);
        Ok(self.spawn(task, remaining, guard))
    }

    /// Resume the task mirrored in the snapshot store, if any. A mirror
    /// older than the flow's poll budget is dropped instead.
    pub fn recover(&self) -> Result<Option<TaskHandle>> {
        let Some(task) = self.mirrored_task() else {
            return Ok(None);
        };
        let budget = self.inner.timing.budget();
        if task.age() > budget {
            tracing::warn!(
                "⚠️ Dropping stale task {} for '{}' (accepted {}s ago, poll budget {}s)",
                task.task_id,
                self.inner.name,
                task.age().as_secs(),
                budget.as_secs()
            );
            self.inner.forget_task();
            return Ok(None);
        }
        self.resume(task).map(Some)
    }

    /// Cancel the running task, if any, and forget the mirrored one.
    /// Returns whether a loop was cancelled. The flow accepts new work once
    /// the loop has wound down.
    pub fn reset(&self) -> bool {
        let active = self.inner.active().take();
        self.inner.forget_task();
        match active {
            Some(token) => {
                tracing::info!("🛑 Resetting '{}', cancelling the active task", self.inner.name);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Task mirrored in the snapshot store, if any.
    pub fn mirrored_task(&self) -> Option<Task> {
        self.inner.store.as_ref()?.get(&self.inner.task_key(), None)
    }

    /// Last completed result from the snapshot store.
    pub fn cached_result(&self, max_age: Option<Duration>) -> Option<ViewModel> {
        let value: Value = self.inner.store.as_ref()?.get(&self.inner.result_key(), max_age)?;
        Some(self.project(&value))
    }

    /// Task for an id obtained elsewhere (e.g. from a timeout message).
    pub fn task_for(&self, task_id: &str) -> Task {
        Task::new(task_id, self.inner.submitter.status_url(task_id))
    }

    /// One status check, outside any poll loop.
    pub async fn check_status(&self, task_id: &str) -> Result<PollResult> {
        let task = self.task_for(task_id);
        StatusPoller::new(self.inner.transport.clone(), self.inner.timing)
            .check(&task.status_url)
            .await
    }

    pub fn project(&self, result: &Value) -> ViewModel {
        project(result, &self.inner.mapping)
    }

    fn spawn(&self, task: Task, initial_delay: Duration, guard: BusyGuard) -> TaskHandle {
        let inner = self.inner.clone();
        let poller = StatusPoller::new(self.inner.transport.clone(), self.inner.timing);
        *self.inner.active() = Some(poller.cancellation_token());
        TaskHandle::spawn(poller, task, initial_delay, move |task, outcome| {
            inner.settle(task, outcome);
            drop(guard);
        })
    }
}
