//! Notification center: transient, dismissible messages about task outcomes.
//! Lightweight: no queues, just a ring buffer of the last 100.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyLevel::Info => write!(f, "info"),
            NotifyLevel::Success => write!(f, "success"),
            NotifyLevel::Warning => write!(f, "warning"),
            NotifyLevel::Error => write!(f, "error"),
        }
    }
}

/// A message for the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub level: NotifyLevel,
    /// Title/summary.
    pub title: String,
    /// Raw message (server or transport error text).
    pub message: String,
    /// Which flow produced it.
    pub source: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub dismissed: bool,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    history: Vec<Notification>,
}

/// Shared notification buffer. Clones share the same history.
#[derive(Clone, Default)]
pub struct NotificationCenter {
    inner: Arc<Mutex<Inner>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification and return its id.
    pub fn push(&self, level: NotifyLevel, title: &str, message: &str, source: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;
        inner.history.push(Notification {
            id,
            level,
            title: title.to_string(),
            message: message.to_string(),
            source: source.to_string(),
            created_at: chrono::Utc::now(),
            dismissed: false,
        });
        // Ring buffer, keep last 100
        if inner.history.len() > HISTORY_LIMIT {
            inner.history.remove(0);
        }
        id
    }

    /// Hide a notification. Returns false if it is unknown or already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.history.iter_mut().find(|n| n.id == id && !n.dismissed) {
            Some(n) => {
                n.dismissed = true;
                true
            }
            None => false,
        }
    }

    /// Notifications not yet dismissed, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .history
            .iter()
            .filter(|n| !n.dismissed)
            .cloned()
            .collect()
    }

    pub fn history(&self) -> Vec<Notification> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.history.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.history.clear();
    }
}
