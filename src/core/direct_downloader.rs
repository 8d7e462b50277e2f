use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use linkgrab_core::models::media::ProgressEvent;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::core::error::{ErrorKind, FetchError, FetchResult};

const CHUNK_TIMEOUT: Duration = Duration::from_secs(45);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 3;

/// Streams `url` into `output`, retrying transient failures with jittered
/// backoff. Data lands in `<output>.part` and is renamed on success.
pub async fn download_direct(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress_tx: mpsc::Sender<ProgressEvent>,
) -> FetchResult<u64> {
    let mut last_err = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let base = 1000 * (attempt as u64);
            let jitter = rand::random::<u64>() % (base / 2 + 1);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }

        match download_attempt(client, url, output, &progress_tx).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if is_fatal_error(&e) {
                    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
                    return Err(e);
                }
                tracing::warn!(
                    "[direct] attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_RETRIES,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
    Err(last_err.unwrap_or_else(|| {
        FetchError::new(
            ErrorKind::NetworkFailure,
            format!("download failed after {} attempts", MAX_RETRIES),
        )
    }))
}

fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Only connection-level trouble is worth another attempt.
fn is_fatal_error(err: &FetchError) -> bool {
    !matches!(err.kind, ErrorKind::NetworkFailure | ErrorKind::Timeout)
}

/// `Content-Length` reported by a HEAD request, if the server answers in time.
pub async fn probe_content_length(client: &reqwest::Client, url: &str) -> Option<u64> {
    match tokio::time::timeout(PROBE_TIMEOUT, client.head(url).send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok()),
        Ok(Ok(resp)) => {
            tracing::debug!("[direct] HEAD {} returned {}", url, resp.status());
            None
        }
        Ok(Err(e)) => {
            tracing::debug!("[direct] HEAD {} failed: {}", url, e);
            None
        }
        Err(_) => None,
    }
}

async fn download_attempt(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress_tx: &mpsc::Sender<ProgressEvent>,
) -> FetchResult<u64> {
    let part_path = part_path_for(output);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::http_status(response.status(), url));
    }

    if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        if let Ok(ct_str) = ct.to_str() {
            if ct_str.contains("text/html") {
                return Err(FetchError::new(
                    ErrorKind::NoMediaInResource,
                    format!("server returned HTML instead of media for {}", url),
                ));
            }
        }
    }

    let total_size = response.content_length().filter(|t| *t > 0);
    let file = tokio::fs::File::create(&part_path).await?;
    let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    loop {
        match tokio::time::timeout(CHUNK_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                file.write_all(&chunk).await?;
                downloaded += chunk.len() as u64;
                let _ = progress_tx
                    .send(ProgressEvent {
                        downloaded_bytes: downloaded,
                        total_bytes: total_size,
                        speed_bytes_per_sec: None,
                    })
                    .await;
            }
            Ok(Some(Err(e))) => {
                file.flush().await?;
                return Err(e.into());
            }
            Ok(None) => break,
            Err(_) => {
                file.flush().await?;
                return Err(FetchError::new(
                    ErrorKind::Timeout,
                    format!("no data received for {} seconds", CHUNK_TIMEOUT.as_secs()),
                ));
            }
        }
    }

    file.flush().await?;
    drop(file);

    if let Some(expected) = total_size {
        if downloaded != expected {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::new(
                ErrorKind::NetworkFailure,
                format!("size mismatch: expected {} bytes, received {}", expected, downloaded),
            ));
        }
    }

    tokio::fs::rename(&part_path, output).await?;
    tracing::debug!("[direct] saved {} bytes to {}", downloaded, output.display());
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per connection.
    async fn serve(status: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut seen = Vec::new();
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = sock.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        seen.extend_from_slice(&buf[..n]);
                    }
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        content_type,
                        body.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&body).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{}/clip.mp4", addr)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(part_path_for(Path::new("video.mp4")), PathBuf::from("video.mp4.part"));
        assert_eq!(
            part_path_for(Path::new("work/7/clip.mp4")),
            PathBuf::from("work/7/clip.mp4.part")
        );
    }

    #[test]
    fn only_transient_kinds_are_retried() {
        assert!(!is_fatal_error(&FetchError::new(ErrorKind::NetworkFailure, "reset")));
        assert!(!is_fatal_error(&FetchError::new(ErrorKind::Timeout, "slow")));
        assert!(is_fatal_error(&FetchError::new(ErrorKind::NotFound, "404")));
        assert!(is_fatal_error(&FetchError::new(ErrorKind::RateLimited, "429")));
        assert!(is_fatal_error(&FetchError::new(ErrorKind::NoMediaInResource, "html")));
    }

    #[tokio::test]
    async fn downloads_body_and_reports_progress() {
        let body = vec![42u8; 64 * 1024];
        let url = serve("200 OK", "video/mp4", body.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip.mp4");
        let (tx, mut rx) = mpsc::channel(1024);

        let size = download_direct(&client(), &url, &output, tx).await.unwrap();
        assert_eq!(size, body.len() as u64);
        assert_eq!(std::fs::read(&output).unwrap(), body);
        assert!(!part_path_for(&output).exists());

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        let last = last.unwrap();
        assert_eq!(last.downloaded_bytes, body.len() as u64);
        assert_eq!(last.total_bytes, Some(body.len() as u64));
    }

    #[tokio::test]
    async fn not_found_is_fatal_and_cleaned_up() {
        let url = serve("404 Not Found", "text/plain", b"gone".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip.mp4");
        let (tx, _rx) = mpsc::channel(16);

        let err = download_direct(&client(), &url, &output, tx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!output.exists());
        assert!(!part_path_for(&output).exists());
    }

    #[tokio::test]
    async fn html_response_is_rejected() {
        let url = serve("200 OK", "text/html; charset=utf-8", b"<html></html>".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(16);

        let err = download_direct(&client(), &url, &dir.path().join("x.mp4"), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoMediaInResource);
    }

    #[tokio::test]
    async fn probe_reads_content_length() {
        let url = serve("200 OK", "video/mp4", vec![0u8; 1000]).await;
        assert_eq!(probe_content_length(&client(), &url).await, Some(1000));
    }
}
