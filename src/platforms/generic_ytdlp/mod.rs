use async_trait::async_trait;
use linkgrab_core::models::media::{DownloadResult, ProgressEvent};
use tokio::sync::mpsc;

use crate::core::error::{FetchError, FetchResult};
use crate::core::ytdlp;
use crate::platforms::traits::{DownloadRequest, ExtractorBackend};

/// Catch-all backend: any http(s) URL is handed to yt-dlp.
pub struct GenericYtdlpBackend;

impl GenericYtdlpBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenericYtdlpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractorBackend for GenericYtdlpBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn can_handle(&self, url: &str) -> bool {
        if let Ok(parsed) = url::Url::parse(url) {
            let scheme = parsed.scheme();
            return scheme == "http" || scheme == "https";
        }
        false
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> FetchResult<DownloadResult> {
        let ytdlp_path =
            ytdlp::find_ytdlp().ok_or_else(|| FetchError::internal("yt-dlp not found in PATH"))?;

        ytdlp::download(
            &ytdlp_path,
            &request.url,
            request.kind,
            &request.work_dir,
            progress,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_any_http_url() {
        let b = GenericYtdlpBackend::new();
        assert!(b.can_handle("https://www.dailymotion.com/video/x8abc"));
        assert!(b.can_handle("http://example.com/anything"));
        assert!(!b.can_handle("file:///etc/passwd"));
        assert!(!b.can_handle("not a url"));
    }
}
