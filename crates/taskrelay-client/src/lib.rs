//! # TaskRelay Client
//!
//! Submit work to webhook-driven workflows and long-poll their status.
//!
//! ## Architecture
//! ```text
//! TaskFlow (one per configured flow)
//!   ├── TaskSubmitter: POST { <field>: content, timestamp }
//!   │     ├── completed + result → ResultProjector → ViewModel
//!   │     └── pending/processing + taskId → Task
//!   ├── StatusPoller (spawned, owned by a TaskHandle)
//!   │     wait initial delay → GET every interval, up to max attempts
//!   │     completed → resolve · failed → reject · else keep polling
//!   ├── SnapshotStore: in-flight task + last result on disk
//!   └── NotificationCenter: dismissible outcome messages
//! ```

pub mod flow;
pub mod handle;
pub mod normalize;
pub mod notify;
pub mod poller;
pub mod projector;
pub mod store;
pub mod submit;
pub mod transport;

#[cfg(test)]
mod testing;

pub use flow::{FlowProfile, FlowStart, TaskFlow, TaskFlowBuilder};
pub use handle::TaskHandle;
pub use normalize::{extract_status, extract_task_id, first_element};
pub use notify::{Notification, NotificationCenter, NotifyLevel};
pub use poller::{PollTiming, StatusPoller, progress_percent};
pub use projector::{FieldMapping, ProjectionSource, SectionField, ViewModel, project};
pub use store::SnapshotStore;
pub use submit::{TaskSubmitter, interpret_reply, render_status_url};
pub use transport::{HttpReply, ReqwestTransport, Transport};
