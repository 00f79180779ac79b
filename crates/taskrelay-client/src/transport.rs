//! HTTP seam between the poll machinery and the network.
//!
//! The poller only needs "POST this JSON" and "GET this URL"; everything it
//! decides is based on the status code and raw body, so that is all a
//! transport hands back.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use taskrelay_core::error::{Result, TaskRelayError};

/// Raw reply from a webhook or status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. Empty bodies are malformed too.
    pub fn json(&self) -> Result<Value> {
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            return Err(TaskRelayError::MalformedBody("empty body".into()));
        }
        serde_json::from_str(trimmed).map_err(|e| TaskRelayError::MalformedBody(e.to_string()))
    }

    /// Body shortened for logs and error messages.
    pub fn body_preview(&self) -> String {
        const MAX: usize = 300;
        if self.body.len() <= MAX {
            return self.body.clone();
        }
        let mut end = MAX;
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &self.body[..end])
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply>;
    async fn get(&self, url: &str) -> Result<HttpReply>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("taskrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TaskRelayError::Transport(format!("Client error: {e}")))?;
        Ok(Self { client })
    }

    async fn into_reply(url: &str, resp: reqwest::Response) -> Result<HttpReply> {
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TaskRelayError::Transport(format!("Read body failed ({url}): {e}")))?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply> {
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TaskRelayError::Transport(format!("POST {url} failed: {e}")))?;
        Self::into_reply(url, resp).await
    }

    async fn get(&self, url: &str) -> Result<HttpReply> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TaskRelayError::Transport(format!("GET {url} failed: {e}")))?;
        Self::into_reply(url, resp).await
    }
}
