//! Normalization of webhook replies.
//!
//! Workflow engines often wrap their answer in a one-element array. Every
//! caller goes through [`first_element`] instead of checking inline.

use serde_json::Value;
use taskrelay_core::types::PollStatus;

/// Keys a task id may be reported under, in lookup order.
pub const TASK_ID_ALIASES: [&str; 4] = ["taskId", "taskid", "id", "task_id"];

/// Unwrap an array-wrapped payload.
///
/// Contract: if `value` is an array, the first element is returned (an empty
/// array yields `Value::Null`); any other value is returned unchanged.
/// Extra elements are dropped, and that is logged.
pub fn first_element(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            if items.len() > 1 {
                tracing::debug!(
                    "Webhook replied with {} elements, using the first",
                    items.len()
                );
            }
            items.into_iter().next().unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Task id under any known alias. Strings must be non-blank; integers are
/// rendered in decimal.
pub fn extract_task_id(value: &Value) -> Option<String> {
    TASK_ID_ALIASES.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    })
}

pub fn extract_status(value: &Value) -> Option<PollStatus> {
    value.get("status")?.as_str().map(PollStatus::from)
}
