use std::ffi::OsStr;
use std::path::PathBuf;

use linkgrab_core::fs_paths::{AppPaths, DefaultPaths};

/// Directory checked ahead of `PATH` for helper binaries (yt-dlp, ffmpeg).
pub fn managed_bin_dir() -> PathBuf {
    DefaultPaths.data_dir().join("bin")
}

fn enhanced_path() -> Option<String> {
    let bin_dir = managed_bin_dir();
    if !bin_dir.is_dir() {
        return None;
    }
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Child process builder for helper tools. The child is killed when its
/// handle is dropped, so an abandoned transfer never leaves a process behind.
pub fn command<S: AsRef<OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    if let Some(path) = enhanced_path() {
        cmd.env("PATH", path);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// Locates `name` in the managed bin dir first, then on `PATH`.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let file = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    let managed = managed_bin_dir().join(&file);
    if managed.is_file() {
        return Some(managed);
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_binary_is_not_found() {
        assert!(find_binary("linkgrab-no-such-tool-xyz").is_none());
    }

    #[tokio::test]
    async fn command_runs_with_null_stdin() {
        if cfg!(unix) {
            let status = command("true").status().await.unwrap();
            assert!(status.success());
        }
    }
}
