use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context};

use crate::core::process;

pub async fn is_ffmpeg_available() -> bool {
    process::command("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn mp3_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-vn".into(),
        "-acodec".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "2".into(),
        output.to_string_lossy().to_string(),
    ]
}

/// Extracts the audio track of `input` into an mp3 next to it.
pub async fn to_mp3(input: &Path) -> anyhow::Result<PathBuf> {
    let output = input.with_extension("mp3");
    if output == input {
        return Ok(output);
    }

    let result = process::command("ffmpeg")
        .args(mp3_args(input, &output))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to run ffmpeg")?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        let _ = tokio::fs::remove_file(&output).await;
        return Err(anyhow!("ffmpeg exited with {}: {}", result.status, last.trim()));
    }

    if let Err(e) = tokio::fs::remove_file(input).await {
        tracing::debug!("[ffmpeg] could not remove {}: {}", input.display(), e);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp3_args_strip_video() {
        let args = mp3_args(Path::new("in.mp4"), Path::new("in.mp3"));
        assert_eq!(
            args,
            ["-y", "-i", "in.mp4", "-vn", "-acodec", "libmp3lame", "-q:a", "2", "in.mp3"]
        );
    }

    #[tokio::test]
    async fn mp3_input_is_returned_as_is() {
        let out = to_mp3(Path::new("/tmp/already.mp3")).await.unwrap();
        assert_eq!(out, PathBuf::from("/tmp/already.mp3"));
    }
}
