use std::time::Duration;

use async_trait::async_trait;
use linkgrab_core::models::media::{DownloadResult, MediaKind, ProgressEvent};
use linkgrab_core::platforms::Platform;
use tokio::sync::mpsc;

use crate::core::direct_downloader::download_direct;
use crate::core::error::{ErrorKind, FetchError, FetchResult};
use crate::core::extract;
use crate::core::url_parser::matches_shape;
use crate::platforms::direct::convert_to_audio;
use crate::platforms::traits::{DownloadRequest, ExtractorBackend};

const IG_APP_ID: &str = "936619743392459";
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Scrapes the post page for the video file and fetches it over plain HTTP.
pub struct InstagramBackend {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl InstagramBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry_delay: RETRY_DELAY,
        }
    }

    async fn fetch_page(&self, url: &str) -> FetchResult<String> {
        let response = self
            .client
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://www.instagram.com/")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-IG-App-ID", IG_APP_ID)
            .timeout(PAGE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::http_status(response.status(), url));
        }
        Ok(response.text().await?)
    }

    async fn attempt(
        &self,
        request: &DownloadRequest,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> FetchResult<DownloadResult> {
        let html = self.fetch_page(&request.url).await?;
        let video_url = media_url_from_page(&html).ok_or_else(|| {
            FetchError::new(
                ErrorKind::NoMediaInResource,
                format!("no video found on {}", request.url),
            )
        })?;
        tracing::debug!("[instagram] media url {}", video_url);

        let file_name = format!("instagram_{}.mp4", chrono::Utc::now().timestamp());
        let output = request.work_dir.join(file_name);
        download_direct(&self.client, &video_url, &output, progress.clone()).await?;

        let file_path = match request.kind {
            MediaKind::Audio => convert_to_audio(output).await,
            MediaKind::Video => output,
        };
        let meta = tokio::fs::metadata(&file_path).await?;
        Ok(DownloadResult {
            file_path,
            file_size_bytes: meta.len(),
        })
    }
}

/// Failures another attempt might get past. A missing video or post will
/// still be missing three seconds later.
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NetworkFailure | ErrorKind::Timeout | ErrorKind::RateLimited
    )
}

/// Embedded page state first, then the `og:video` tag.
pub fn media_url_from_page(html: &str) -> Option<String> {
    extract::instagram_state(html).or_else(|| extract::og_video(html))
}

#[async_trait]
impl ExtractorBackend for InstagramBackend {
    fn name(&self) -> &str {
        "instagram"
    }

    fn can_handle(&self, url: &str) -> bool {
        Platform::from_url(url) == Some(Platform::Instagram)
            && matches_shape(Platform::Instagram, url)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> FetchResult<DownloadResult> {
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(request, &progress).await {
                Ok(result) => return Ok(result),
                Err(e) if !is_transient(e.kind) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "[instagram] attempt {}/{} failed for {}: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        request.url,
                        e
                    );
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::internal("instagram download failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn accepts_post_shapes_only() {
        let b = InstagramBackend::new(reqwest::Client::new());
        assert!(b.can_handle("https://www.instagram.com/p/CxYz123/"));
        assert!(b.can_handle("https://instagram.com/reel/CxYz123"));
        assert!(!b.can_handle("https://www.instagram.com/someuser/"));
        assert!(!b.can_handle("https://www.tiktok.com/@u/video/123"));
    }

    #[test]
    fn prefers_embedded_state_over_og_tag() {
        let html = r#"<html><head>
            <meta property="og:video" content="https://cdn.example.com/og.mp4">
            <script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{"video_url":"https://cdn.example.com/state.mp4"}}}]}};</script>
            </head></html>"#;
        assert_eq!(
            media_url_from_page(html).as_deref(),
            Some("https://cdn.example.com/state.mp4")
        );
    }

    #[test]
    fn falls_back_to_og_video() {
        let html = r#"<meta property="og:video" content="https://cdn.example.com/og.mp4">"#;
        assert_eq!(
            media_url_from_page(html).as_deref(),
            Some("https://cdn.example.com/og.mp4")
        );
        assert!(media_url_from_page("<html></html>").is_none());
    }

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(is_transient(ErrorKind::NetworkFailure));
        assert!(is_transient(ErrorKind::Timeout));
        assert!(is_transient(ErrorKind::RateLimited));
        assert!(!is_transient(ErrorKind::NoMediaInResource));
        assert!(!is_transient(ErrorKind::NotFound));
        assert!(!is_transient(ErrorKind::DiskExhausted));
    }

    /// Answers every request with the same HTML page and counts requests.
    async fn serve_page(html: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        html.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(html.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        (format!("http://{}/p/abc/", addr), hits)
    }

    #[tokio::test]
    async fn post_without_video_fails_on_first_attempt() {
        let (url, hits) = serve_page("<html><head><title>photo</title></head></html>").await;
        let dir = tempfile::tempdir().unwrap();
        let backend = InstagramBackend::new(reqwest::Client::builder().no_proxy().build().unwrap());
        let request = DownloadRequest {
            url,
            kind: MediaKind::Video,
            work_dir: dir.path().to_path_buf(),
        };
        let (tx, _rx) = mpsc::channel(4);

        let err = tokio::time::timeout(Duration::from_secs(2), backend.download(&request, tx))
            .await
            .expect("no retry delay for a post without video")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoMediaInResource);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend =
            InstagramBackend::new(reqwest::Client::builder().no_proxy().build().unwrap());
        backend.retry_delay = Duration::from_millis(1);
        let request = DownloadRequest {
            url: "http://127.0.0.1:9/p/abc/".to_string(),
            kind: MediaKind::Video,
            work_dir: dir.path().to_path_buf(),
        };
        let (tx, _rx) = mpsc::channel(4);
        let err = backend.download(&request, tx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkFailure);
    }
}
