use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::models::media::MediaKind;

pub type TaskId = u64;
pub type RequesterId = i64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum TaskState {
    Queued,
    Admitted,
    ResolvingCache,
    Downloading,
    Saving,
    Delivering,
    Done,
    Failed { kind: String },
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum StatusControls {
    /// Shown while a transfer runs; lets the owner cancel it.
    Transfer { task_id: TaskId },
    /// Resubmits the same canonical URL through a short-lived retry id.
    Retry { retry_id: String, kind: MediaKind },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub requester: RequesterId,
    pub text: String,
    pub controls: Option<StatusControls>,
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub task_id: TaskId,
    pub requester: RequesterId,
    pub file_path: PathBuf,
    pub kind: MediaKind,
    pub caption: String,
    pub from_cache: bool,
}

/// Messaging side of the system. Implementations run on the scheduler's
/// control flow, never on a transfer task.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn on_status(&self, update: StatusUpdate);
    async fn on_complete(&self, delivery: &Delivery) -> anyhow::Result<()>;
    async fn on_oversize(&self, task_id: TaskId, requester: RequesterId, link: Option<String>);
}

/// Fallback hosting for files above the delivery size ceiling.
#[async_trait]
pub trait HostingUploader: Send + Sync + 'static {
    async fn upload(&self, path: &Path) -> anyhow::Result<Option<String>>;
}

#[async_trait]
pub trait HistoryRecorder: Send + Sync + 'static {
    async fn record(&self, requester: RequesterId, url: &str, kind: MediaKind) -> anyhow::Result<()>;
}

pub struct NoHosting;

#[async_trait]
impl HostingUploader for NoHosting {
    async fn upload(&self, _path: &Path) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

pub struct NoHistory;

#[async_trait]
impl HistoryRecorder for NoHistory {
    async fn record(&self, _requester: RequesterId, _url: &str, _kind: MediaKind) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Failed { kind: "timeout".into() }.is_terminal());
        assert!(!TaskState::Downloading.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
    }
}
