use crate::error::OperationError;
use crate::file_ops::{atomic_write, set_mode};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Point-in-time image of one path, captured before its first mutation.
/// Never mutated after capture.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: PathBuf,
    /// `None` means the path did not exist at capture time.
    pub content: Option<Vec<u8>>,
    pub mode: Option<u32>,
    pub mtime: Option<SystemTime>,
    pub size: u64,
}

impl FileSnapshot {
    /// Capture the current state of `path`. A missing file is a valid
    /// snapshot (restore will delete whatever was created there).
    pub fn capture(path: &Path) -> Result<Self, OperationError> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    content: None,
                    mode: None,
                    mtime: None,
                    size: 0,
                });
            }
            Err(e) => {
                return Err(OperationError::SnapshotError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let content = fs::read(path).map_err(|e| OperationError::SnapshotError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            size: content.len() as u64,
            content: Some(content),
            mode: unix_mode(&metadata),
            mtime: metadata.modified().ok(),
        })
    }

    pub fn existed(&self) -> bool {
        self.content.is_some()
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Owned by one run: lazy at-most-once-per-path snapshots plus the diff
/// baseline. Discarded on commit, replayed in reverse capture order on
/// rollback.
#[derive(Debug, Default)]
pub struct SnapshotSet {
    snapshots: Vec<FileSnapshot>,
    captured: HashMap<PathBuf, usize>,
    root: PathBuf,
}

impl SnapshotSet {
    pub fn new(root: &Path) -> Self {
        Self {
            snapshots: Vec::new(),
            captured: HashMap::new(),
            root: root.to_path_buf(),
        }
    }

    /// Snapshot `path` unless it has been captured already.
    pub fn capture(&mut self, path: &Path) -> Result<&FileSnapshot, OperationError> {
        if let Some(&i) = self.captured.get(path) {
            return Ok(&self.snapshots[i]);
        }
        let snapshot = FileSnapshot::capture(path)?;
        let index = self.snapshots.len();
        self.captured.insert(path.to_path_buf(), index);
        self.snapshots.push(snapshot);
        Ok(&self.snapshots[index])
    }

    pub fn get(&self, path: &Path) -> Option<&FileSnapshot> {
        self.captured.get(path).map(|&i| &self.snapshots[i])
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.snapshots.iter().map(|s| s.path.as_path())
    }

    /// Restore every captured path to its snapshotted state, in reverse
    /// capture order. Files that did not exist at capture time are
    /// removed again, including any empty directories created for them.
    pub fn restore_all(&self) -> Result<(), OperationError> {
        for snapshot in self.snapshots.iter().rev() {
            match &snapshot.content {
                Some(content) => {
                    atomic_write(&snapshot.path, content)?;
                    if let Some(mode) = snapshot.mode {
                        if let Err(e) = set_mode(&snapshot.path, mode) {
                            tracing::warn!(
                                "could not restore mode {:o} on {}: {e}",
                                mode,
                                snapshot.path.display()
                            );
                        }
                    }
                }
                None => {
                    if snapshot.path.exists() {
                        fs::remove_file(&snapshot.path).map_err(|e| {
                            OperationError::RollbackError {
                                path: snapshot.path.clone(),
                                source: e,
                            }
                        })?;
                    }
                    if let Some(parent) = snapshot.path.parent() {
                        remove_empty_ancestors(parent, &self.root);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop all snapshots. Called on successful commit.
    pub fn discard(self) {
        drop(self);
    }
}

/// Remove empty ancestor directories up to (but not including) the root.
fn remove_empty_ancestors(dir: &Path, root: &Path) {
    let mut current = dir.to_path_buf();
    while current != root && current.starts_with(root) {
        let empty = fs::read_dir(&current)
            .map(|mut d| d.next().is_none())
            .unwrap_or(false);
        if !empty || fs::remove_dir(&current).is_err() {
            break;
        }
        if !current.pop() {
            break;
        }
    }
}
