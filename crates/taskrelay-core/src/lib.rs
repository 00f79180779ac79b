//! # TaskRelay Core
//!
//! Shared data model, error taxonomy and configuration for TaskRelay.

pub mod config;
pub mod error;
pub mod types;

pub use config::{FlowConfig, PollerConfig, StoreConfig, TaskRelayConfig};
pub use error::{Result, TaskRelayError};
pub use types::{PollResult, PollStatus, PollerState, Progress, SubmitOutcome, Task};
