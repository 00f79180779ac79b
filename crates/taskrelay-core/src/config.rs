//! TaskRelay configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskRelayError};

/// Placeholder substituted with the task id in status URL templates.
pub const TASK_ID_PLACEHOLDER: &str = "{task_id}";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRelayConfig {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_flows")]
    pub flows: Vec<FlowConfig>,
}

impl Default for TaskRelayConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            store: StoreConfig::default(),
            flows: default_flows(),
        }
    }
}

impl TaskRelayConfig {
    /// Load config from the default path (~/.taskrelay/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskRelayError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TaskRelayError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskRelayError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TaskRelay home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskrelay")
    }

    /// Look up a flow by name.
    pub fn flow(&self, name: &str) -> Option<&FlowConfig> {
        self.flows.iter().find(|f| f.name == name)
    }

    /// Reject configs the poller could not run with.
    pub fn validate(&self) -> Result<()> {
        if self.poller.max_attempts == 0 {
            return Err(TaskRelayError::Config(
                "poller.max_attempts must be at least 1".into(),
            ));
        }
        let mut seen = HashSet::new();
        for flow in &self.flows {
            if !seen.insert(flow.name.as_str()) {
                return Err(TaskRelayError::Config(format!(
                    "duplicate flow name '{}'",
                    flow.name
                )));
            }
            flow.validate()?;
        }
        Ok(())
    }
}

/// Poll timing defaults, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_initial_delay() -> u64 { 180 }
fn default_interval() -> u64 { 15 }
fn default_max_attempts() -> u32 { 80 }
fn default_request_timeout() -> u64 { 30 }

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Snapshot cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_store_dir")]
    pub dir: String,
    /// Cached results older than this are ignored on read.
    #[serde(default = "default_result_max_age")]
    pub result_max_age_secs: u64,
}

fn bool_true() -> bool { true }
fn default_store_dir() -> String { "~/.taskrelay/cache".into() }
fn default_result_max_age() -> u64 { 86_400 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_store_dir(),
            result_max_age_secs: default_result_max_age(),
        }
    }
}

impl StoreConfig {
    /// Store directory with `~` and env vars expanded.
    pub fn resolved_dir(&self) -> PathBuf {
        match shellexpand::full(&self.dir) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                tracing::warn!("⚠️ Could not expand store dir '{}': {e}", self.dir);
                PathBuf::from(&self.dir)
            }
        }
    }
}

/// One named submit/poll/project pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    pub webhook_url: String,
    /// Status endpoint, with `{task_id}` where the id goes.
    pub status_url_template: String,
    /// JSON field that carries the submitted content.
    #[serde(default = "default_payload_field")]
    pub payload_field: String,
    /// Built-in projection profile: "title", "content" or "image-prompt".
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub initial_delay_secs: Option<u64>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Extra title aliases tried before the profile's own.
    #[serde(default)]
    pub title_fields: Vec<String>,
    /// Extra full-report aliases tried before the profile's own.
    #[serde(default)]
    pub report_fields: Vec<String>,
}

fn default_payload_field() -> String { "content".into() }

impl FlowConfig {
    pub fn new(name: &str, webhook_url: &str, status_url_template: &str, payload_field: &str) -> Self {
        Self {
            name: name.to_string(),
            webhook_url: webhook_url.to_string(),
            status_url_template: status_url_template.to_string(),
            payload_field: payload_field.to_string(),
            profile: None,
            initial_delay_secs: None,
            interval_secs: None,
            max_attempts: None,
            title_fields: Vec::new(),
            report_fields: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TaskRelayError::Config("flow name must not be empty".into()));
        }
        if self.webhook_url.trim().is_empty() {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' has no webhook_url",
                self.name
            )));
        }
        if !self.status_url_template.contains(TASK_ID_PLACEHOLDER) {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' status_url_template must contain {TASK_ID_PLACEHOLDER}",
                self.name
            )));
        }
        if self.payload_field.trim().is_empty() {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' has an empty payload_field",
                self.name
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(TaskRelayError::Config(format!(
                "flow '{}' max_attempts must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Projection profile, falling back to the flow name.
    pub fn profile_name(&self) -> &str {
        self.profile.as_deref().unwrap_or(&self.name)
    }
}

const DEFAULT_BASE_URL: &str = "http://localhost:5678";

fn default_flows() -> Vec<FlowConfig> {
    let status = format!("{DEFAULT_BASE_URL}/task-status/{TASK_ID_PLACEHOLDER}");
    vec![
        FlowConfig::new(
            "title",
            &format!("{DEFAULT_BASE_URL}/webhook/generate-title"),
            &status,
            "subject",
        ),
        FlowConfig::new(
            "content",
            &format!("{DEFAULT_BASE_URL}/webhook/generate-content"),
            &status,
            "title",
        ),
        FlowConfig::new(
            "image-prompt",
            &format!("{DEFAULT_BASE_URL}/webhook/generate-image-prompt"),
            &status,
            "content",
        ),
    ]
}
