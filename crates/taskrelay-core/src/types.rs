//! Task definitions: the data model shared by submitter, poller and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task accepted by a webhook and processed asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier returned by the webhook.
    pub task_id: String,
    /// Fully rendered status endpoint for this task.
    pub status_url: String,
    /// When the submission was acknowledged.
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, status_url: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status_url: status_url.into(),
            created_at: Utc::now(),
        }
    }

    /// Time elapsed since submission (zero if the clock went backwards).
    pub fn age(&self) -> std::time::Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }
}

/// Status reported by a task-status endpoint.
///
/// The set is open: anything unrecognized is kept as `Unknown(raw)` so the
/// poller can log it and keep going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PollStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NotFound,
    Unknown(String),
}

impl PollStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStatus::Completed | PollStatus::Failed)
    }

    /// Still being worked on (or not visible yet).
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            PollStatus::Pending | PollStatus::Processing | PollStatus::NotFound
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Processing => "processing",
            PollStatus::Completed => "completed",
            PollStatus::Failed => "failed",
            PollStatus::NotFound => "not_found",
            PollStatus::Unknown(raw) => raw,
        }
    }
}

impl Default for PollStatus {
    fn default() -> Self {
        PollStatus::Unknown(String::new())
    }
}

impl From<&str> for PollStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => PollStatus::Pending,
            "processing" => PollStatus::Processing,
            "completed" => PollStatus::Completed,
            "failed" => PollStatus::Failed,
            "not_found" => PollStatus::NotFound,
            _ => PollStatus::Unknown(raw.to_string()),
        }
    }
}

impl From<String> for PollStatus {
    fn from(raw: String) -> Self {
        PollStatus::from(raw.as_str())
    }
}

impl From<PollStatus> for String {
    fn from(status: PollStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status-endpoint reply. Overwritten on every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    #[serde(default)]
    pub status: PollStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl PollResult {
    /// Lenient extraction: missing or odd-typed fields never fail.
    pub fn from_value(value: &Value) -> Self {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map(PollStatus::from)
            .unwrap_or_default();
        let result = value.get("result").filter(|r| !r.is_null()).cloned();
        let error = match value.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let duration = value.get("duration").and_then(|d| match d {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        Self {
            status,
            result,
            error,
            duration,
        }
    }
}

/// What a webhook submission turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Accepted for background processing; poll `Task::status_url`.
    Async(Task),
    /// The workflow answered inline.
    Completed(Value),
}

/// Poll loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    Idle,
    WaitingInitialDelay,
    Polling { attempt: u32 },
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollerState::Completed
                | PollerState::Failed
                | PollerState::TimedOut
                | PollerState::Cancelled
        )
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollerState::Idle => write!(f, "idle"),
            PollerState::WaitingInitialDelay => write!(f, "waiting"),
            PollerState::Polling { attempt } => write!(f, "polling #{attempt}"),
            PollerState::Completed => write!(f, "completed"),
            PollerState::Failed => write!(f, "failed"),
            PollerState::TimedOut => write!(f, "timed out"),
            PollerState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Cosmetic progress published while a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub state: PollerState,
    pub percent: u8,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Progress {
    pub fn idle(max_attempts: u32) -> Self {
        Self {
            state: PollerState::Idle,
            percent: 0,
            attempt: 0,
            max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing_is_lenient() {
        assert_eq!(PollStatus::from("COMPLETED"), PollStatus::Completed);
        assert_eq!(PollStatus::from(" pending "), PollStatus::Pending);
        assert_eq!(PollStatus::from("not_found"), PollStatus::NotFound);
        assert_eq!(
            PollStatus::from("queued"),
            PollStatus::Unknown("queued".into())
        );
        assert!(PollStatus::Failed.is_terminal());
        assert!(!PollStatus::Unknown("x".into()).is_terminal());
    }

    #[test]
    fn test_status_serde_as_string() {
        let s: PollStatus = serde_json::from_value(json!("processing")).unwrap();
        assert_eq!(s, PollStatus::Processing);
        assert_eq!(serde_json::to_value(&s).unwrap(), json!("processing"));
    }

    #[test]
    fn test_poll_result_from_value() {
        let r = PollResult::from_value(&json!({
            "status": "completed",
            "result": {"title": "Cats!"},
            "duration": "12.5"
        }));
        assert_eq!(r.status, PollStatus::Completed);
        assert_eq!(r.result, Some(json!({"title": "Cats!"})));
        assert_eq!(r.duration, Some(12.5));
        assert!(r.error.is_none());

        let r = PollResult::from_value(&json!({"error": {"code": 3}, "result": null}));
        assert_eq!(r.status, PollStatus::default());
        assert!(r.result.is_none());
        assert_eq!(r.error.as_deref(), Some(r#"{"code":3}"#));
    }

    #[test]
    fn test_task_roundtrip_keeps_created_at() {
        let task = Task::new("abc123", "http://x/task-status/abc123");
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
