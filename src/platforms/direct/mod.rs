use async_trait::async_trait;
use linkgrab_core::models::media::{DownloadResult, MediaKind, ProgressEvent};
use tokio::sync::mpsc;

use crate::core::direct_downloader::download_direct;
use crate::core::error::FetchResult;
use crate::core::ffmpeg;
use crate::core::filename::file_name_from_url;
use crate::core::url_parser::is_direct_file;
use crate::platforms::traits::{DownloadRequest, ExtractorBackend};

pub struct DirectFileBackend {
    client: reqwest::Client,
}

impl DirectFileBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractorBackend for DirectFileBackend {
    fn name(&self) -> &str {
        "direct"
    }

    fn can_handle(&self, url: &str) -> bool {
        is_direct_file(url)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> FetchResult<DownloadResult> {
        let output = request
            .work_dir
            .join(file_name_from_url(&request.url, request.kind));
        let size = download_direct(&self.client, &request.url, &output, progress).await?;

        let file_path = match request.kind {
            MediaKind::Audio => convert_to_audio(output).await,
            MediaKind::Video => output,
        };
        let file_size_bytes = match tokio::fs::metadata(&file_path).await {
            Ok(m) => m.len(),
            Err(_) => size,
        };

        Ok(DownloadResult {
            file_path,
            file_size_bytes,
        })
    }
}

/// Converts to mp3, keeping the original file when ffmpeg fails.
pub(crate) async fn convert_to_audio(path: std::path::PathBuf) -> std::path::PathBuf {
    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    if is_mp3 {
        return path;
    }
    if !ffmpeg::is_ffmpeg_available().await {
        tracing::warn!("[ffmpeg] not found, delivering {} unconverted", path.display());
        return path;
    }

    match ffmpeg::to_mp3(&path).await {
        Ok(mp3) => mp3,
        Err(e) => {
            tracing::warn!("[ffmpeg] audio conversion failed for {}: {}", path.display(), e);
            path
        }
    }
}
