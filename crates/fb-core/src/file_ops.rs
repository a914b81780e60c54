use crate::error::OperationError;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write content to a file atomically via write-to-temp-then-rename. The
/// temp file lives in the target's parent directory so the final rename
/// stays on one filesystem.
pub fn atomic_write(target: &Path, content: &[u8]) -> Result<(), OperationError> {
    let parent = target.parent().ok_or_else(|| OperationError::WriteError {
        path: target.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
    })?;

    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| OperationError::WriteError {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut temp_file = NamedTempFile::new_in(parent).map_err(|e| OperationError::WriteError {
        path: target.to_path_buf(),
        source: e,
    })?;

    temp_file
        .write_all(content)
        .and_then(|_| temp_file.as_file().sync_all())
        .map_err(|e| OperationError::WriteError {
            path: target.to_path_buf(),
            source: e,
        })?;

    temp_file
        .persist(target)
        .map_err(|e| OperationError::WriteError {
            path: target.to_path_buf(),
            source: e.error,
        })?;

    Ok(())
}

/// Restore a file's unix permission bits. No-op on other platforms.
#[cfg(unix)]
pub fn set_mode(target: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_target: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
