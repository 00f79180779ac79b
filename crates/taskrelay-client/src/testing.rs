//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskrelay_core::error::{Result, TaskRelayError};
use tokio::time::Instant;

use crate::transport::{HttpReply, Transport};

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
    pub at: Instant,
}

/// Replies are consumed in order; once the GET script runs dry every GET
/// answers `{"status":"processing"}`.
pub struct ScriptedTransport {
    posts: Mutex<VecDeque<Result<HttpReply>>>,
    gets: Mutex<VecDeque<Result<HttpReply>>>,
    get_delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            posts: Mutex::new(VecDeque::new()),
            gets: Mutex::new(VecDeque::new()),
            get_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_post(&self, status: u16, body: &str) {
        self.posts
            .lock()
            .unwrap()
            .push_back(Ok(HttpReply::new(status, body)));
    }

    pub fn push_get(&self, status: u16, body: &str) {
        self.gets
            .lock()
            .unwrap()
            .push_back(Ok(HttpReply::new(status, body)));
    }

    pub fn push_get_error(&self, err: TaskRelayError) {
        self.gets.lock().unwrap().push_back(Err(err));
    }

    /// Every later GET takes `delay` before answering.
    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "GET")
            .collect()
    }

    fn record(&self, method: &'static str, url: &str, body: Option<Value>) {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            body,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply> {
        self.record("POST", url, Some(body.clone()));
        self.posts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TaskRelayError::Transport("no scripted POST reply".into())))
    }

    async fn get(&self, url: &str) -> Result<HttpReply> {
        self.record("GET", url, None);
        let delay = *self.get_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpReply::new(200, r#"{"status":"processing"}"#)))
    }
}
