use std::path::PathBuf;

use async_trait::async_trait;
use linkgrab_core::models::media::{DownloadResult, MediaKind, ProgressEvent};
use tokio::sync::mpsc;

use crate::core::error::FetchResult;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: MediaKind,
    /// Per-task scratch directory; the backend writes its output here.
    pub work_dir: PathBuf,
}

#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, url: &str) -> bool;
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> FetchResult<DownloadResult>;
}
