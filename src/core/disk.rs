use std::path::Path;

/// Bytes available to unprivileged writers on the filesystem holding `path`.
#[cfg(unix)]
pub fn free_bytes(path: &Path) -> anyhow::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn free_bytes(_path: &Path) -> anyhow::Result<u64> {
    anyhow::bail!("free space query unsupported on this platform")
}

/// True when at least `floor_bytes` are free under `path`. An unreadable
/// filesystem counts as enough space so the transfer itself reports the
/// real error.
pub fn has_free_space(path: &Path, floor_bytes: u64) -> bool {
    match free_bytes(path) {
        Ok(free) => {
            if free < floor_bytes {
                tracing::warn!(
                    "[disk] {} has {} bytes free, below floor of {}",
                    path.display(),
                    free,
                    floor_bytes
                );
            }
            free >= floor_bytes
        }
        Err(e) => {
            tracing::debug!("[disk] free space check failed for {}: {}", path.display(), e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_floor_always_passes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(has_free_space(dir.path(), 0));
    }

    #[test]
    fn impossible_floor_fails() {
        let dir = tempfile::tempdir().unwrap();
        if free_bytes(dir.path()).is_ok() {
            assert!(!has_free_space(dir.path(), u64::MAX));
        }
    }

    #[test]
    fn missing_path_is_not_blocking() {
        assert!(has_free_space(Path::new("/definitely/not/here/linkgrab"), u64::MAX));
    }
}
