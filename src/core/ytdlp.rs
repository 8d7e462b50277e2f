use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use linkgrab_core::models::media::{DownloadResult, MediaKind, ProgressEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::core::error::{ErrorKind, FetchError, FetchResult};
use crate::core::process;

const PROGRESS_TEMPLATE: &str = "download:%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s";
const STDERR_TAIL_LINES: usize = 40;

pub fn find_ytdlp() -> Option<PathBuf> {
    process::find_binary("yt-dlp")
}

pub fn build_args(url: &str, kind: MediaKind, output_dir: &Path) -> Vec<String> {
    let output_template = output_dir.join("%(id)s.%(ext)s").to_string_lossy().to_string();

    let mut args: Vec<String> = match kind {
        MediaKind::Audio => vec![
            "-f".into(),
            "bestaudio/best".into(),
            "-x".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            "192K".into(),
        ],
        MediaKind::Video => vec![
            "-f".into(),
            "bv*+ba/b".into(),
            "--merge-output-format".into(),
            "mp4".into(),
        ],
    };

    args.extend([
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "-o".to_string(),
        output_template,
        url.to_string(),
    ]);
    args
}

fn parse_field_u64(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64)
}

pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix("download:")?;
    let mut fields = rest.split('|');

    let downloaded = parse_field_u64(fields.next()?)?;
    let total = fields.next().and_then(parse_field_u64);
    let estimate = fields.next().and_then(parse_field_u64);
    let speed = fields
        .next()
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s > 0.0);

    Some(ProgressEvent {
        downloaded_bytes: downloaded,
        total_bytes: total.or(estimate).filter(|t| *t > 0),
        speed_bytes_per_sec: speed,
    })
}

/// Picks the most meaningful line out of yt-dlp's stderr.
fn failure_message(tail: &VecDeque<String>, status: std::process::ExitStatus) -> String {
    tail.iter()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| tail.back())
        .cloned()
        .unwrap_or_else(|| format!("yt-dlp exited with {}", status))
}

pub async fn download(
    ytdlp: &Path,
    url: &str,
    kind: MediaKind,
    output_dir: &Path,
    progress: mpsc::Sender<ProgressEvent>,
) -> FetchResult<DownloadResult> {
    tokio::fs::create_dir_all(output_dir).await?;

    let args = build_args(url, kind, output_dir);
    tracing::debug!("[yt-dlp] {} {}", ytdlp.display(), args.join(" "));

    let mut child = process::command(ytdlp)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FetchError::internal(format!("failed to start yt-dlp: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| FetchError::internal("yt-dlp stdout unavailable"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| FetchError::internal("yt-dlp stderr unavailable"))?;

    let progress_tx = progress.clone();
    let line_reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(ev) = parse_progress_line(&line) {
                let _ = progress_tx.send(ev).await;
            }
        }
    });

    let stderr_reader = tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    });

    let status = child
        .wait()
        .await
        .map_err(|e| FetchError::internal(format!("yt-dlp process failed: {}", e)))?;

    let _ = line_reader.await;
    let tail = stderr_reader.await.unwrap_or_default();

    if !status.success() {
        let message = failure_message(&tail, status);
        tracing::warn!("[yt-dlp] failed for {}: {}", url, message);
        return Err(FetchError::classified(message));
    }

    let file_path = find_downloaded_file(output_dir, kind).await?;
    let meta = tokio::fs::metadata(&file_path).await?;

    let _ = progress
        .send(ProgressEvent {
            downloaded_bytes: meta.len(),
            total_bytes: Some(meta.len()),
            speed_bytes_per_sec: None,
        })
        .await;

    Ok(DownloadResult {
        file_path,
        file_size_bytes: meta.len(),
    })
}

fn is_leftover(name: &str) -> bool {
    name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.ends_with(".temp")
        || name.contains(".part-Frag")
        || name.starts_with('.')
}

/// Newest finished file in `output_dir`, preferring the kind's extension.
pub async fn find_downloaded_file(output_dir: &Path, kind: MediaKind) -> FetchResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    let mut best: Option<(bool, std::time::SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if is_leftover(name) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        let preferred = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(kind.default_extension()))
            .unwrap_or(false);

        let better = match &best {
            None => true,
            Some((best_pref, best_time, _)) => {
                (preferred, modified) > (*best_pref, *best_time)
            }
        };
        if better {
            best = Some((preferred, modified, path));
        }
    }

    best.map(|(_, _, p)| p).ok_or_else(|| {
        FetchError::new(
            ErrorKind::NoMediaInResource,
            format!("no downloaded file found in {}", output_dir.display()),
        )
    })
}
