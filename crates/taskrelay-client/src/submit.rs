//! Task submission: POST content to a webhook and classify the reply.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use taskrelay_core::config::TASK_ID_PLACEHOLDER;
use taskrelay_core::error::{Result, TaskRelayError};
use taskrelay_core::types::{PollResult, PollStatus, SubmitOutcome, Task};

use crate::normalize::{extract_status, extract_task_id, first_element};
use crate::transport::{HttpReply, Transport};

/// Posts `{ <payload_field>: content, timestamp }` to a webhook.
#[derive(Clone)]
pub struct TaskSubmitter {
    transport: Arc<dyn Transport>,
    webhook_url: String,
    status_url_template: String,
    payload_field: String,
}

impl TaskSubmitter {
    pub fn new(
        transport: Arc<dyn Transport>,
        webhook_url: &str,
        status_url_template: &str,
        payload_field: &str,
    ) -> Self {
        Self {
            transport,
            webhook_url: webhook_url.to_string(),
            status_url_template: status_url_template.to_string(),
            payload_field: payload_field.to_string(),
        }
    }

    /// Request body for `content`.
    pub fn payload(&self, content: &str) -> Value {
        let mut body = Map::new();
        body.insert(self.payload_field.clone(), Value::String(content.to_string()));
        body.insert(
            "timestamp".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(body)
    }

    pub async fn submit(&self, content: &str) -> Result<SubmitOutcome> {
        let body = self.payload(content);
        tracing::info!("📤 Submitting to {}", self.webhook_url);
        let reply = self.transport.post_json(&self.webhook_url, &body).await?;
        interpret_reply(&reply, &self.status_url_template)
    }

    pub fn status_url(&self, task_id: &str) -> String {
        render_status_url(&self.status_url_template, task_id)
    }
}

/// Substitute the (URL-encoded) task id into a status URL template.
pub fn render_status_url(template: &str, task_id: &str) -> String {
    template.replace(TASK_ID_PLACEHOLDER, &urlencoding::encode(task_id))
}

/// Classify a webhook reply.
///
/// `pending`/`processing` plus a task id → poll it. `completed` with an
/// inline, non-null `result` → done. `failed` → the server's error. Anything
/// else is an invalid workflow response.
pub fn interpret_reply(reply: &HttpReply, status_url_template: &str) -> Result<SubmitOutcome> {
    if !reply.is_success() {
        return Err(TaskRelayError::HttpStatus {
            status: reply.status,
            body: reply.body_preview(),
        });
    }
    let value = reply.json().map_err(|e| {
        TaskRelayError::InvalidResponse(format!("webhook body is not JSON ({e})"))
    })?;
    interpret_value(first_element(value), status_url_template)
}

fn interpret_value(value: Value, status_url_template: &str) -> Result<SubmitOutcome> {
    let status = extract_status(&value);
    let task_id = extract_task_id(&value);

    match (status, task_id) {
        (Some(PollStatus::Pending | PollStatus::Processing), Some(task_id)) => {
            let status_url = render_status_url(status_url_template, &task_id);
            tracing::info!("⏳ Task accepted: {task_id}");
            Ok(SubmitOutcome::Async(Task::new(task_id, status_url)))
        }
        (Some(PollStatus::Completed), _) => {
            match value.get("result").filter(|r| !r.is_null()) {
                Some(result) => {
                    tracing::info!("✅ Workflow answered inline");
                    Ok(SubmitOutcome::Completed(result.clone()))
                }
                None => Err(TaskRelayError::InvalidResponse(
                    "completed without a result".into(),
                )),
            }
        }
        (Some(PollStatus::Failed), task_id) => {
            let parsed = PollResult::from_value(&value);
            Err(TaskRelayError::TaskFailed {
                task_id: task_id.unwrap_or_default(),
                message: parsed.error.unwrap_or_else(|| "workflow failed".into()),
            })
        }
        (status, task_id) => Err(TaskRelayError::InvalidResponse(format!(
            "status={}, taskId={}",
            status.as_ref().map(PollStatus::as_str).unwrap_or("<missing>"),
            task_id.as_deref().unwrap_or("<missing>")
        ))),
    }
}
