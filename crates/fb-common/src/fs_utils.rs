use std::path::{Path, PathBuf};

/// Reasons a raw request path is rejected before any filesystem access.
///
/// These checks are a security boundary: they run on the raw string from
/// the request, independent of whether the path resolves inside the
/// project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSafetyError {
    /// Path contains an embedded NUL byte.
    NullByte,
    /// Path points at a device file (`/dev/...`).
    DeviceFile,
    /// Path is absolute; request paths must be relative to the root.
    Absolute,
    /// Path climbs more than one `..` segment above its starting point.
    ExcessiveTraversal,
    /// Path is empty.
    Empty,
}

impl std::fmt::Display for PathSafetyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSafetyError::NullByte => write!(f, "path contains a null byte"),
            PathSafetyError::DeviceFile => write!(f, "path targets a device file"),
            PathSafetyError::Absolute => {
                write!(f, "path is absolute; paths must be relative to the project root")
            }
            PathSafetyError::ExcessiveTraversal => {
                write!(f, "path exceeds one parent-traversal segment")
            }
            PathSafetyError::Empty => write!(f, "path is empty"),
        }
    }
}

impl std::error::Error for PathSafetyError {}

/// Validate a raw request path against the safety rules.
///
/// A single leading `..` is tolerated (tool roots sometimes sit one level
/// below the files they manage); anything deeper is rejected.
pub fn check_path_safety(raw: &str) -> Result<(), PathSafetyError> {
    if raw.is_empty() {
        return Err(PathSafetyError::Empty);
    }
    if raw.contains('\0') {
        return Err(PathSafetyError::NullByte);
    }
    if raw.starts_with("/dev/") || raw == "/dev" {
        return Err(PathSafetyError::DeviceFile);
    }
    // An absolute path handed to Path::join replaces the root outright,
    // so it can never be allowed through to resolution.
    if Path::new(raw).has_root() || raw.starts_with('\\') || raw.as_bytes().get(1) == Some(&b':') {
        return Err(PathSafetyError::Absolute);
    }

    // Count how far the path can climb: net depth below zero by more than
    // one segment means it escapes past the tolerated parent.
    let mut depth: i64 = 0;
    let mut min_depth: i64 = 0;
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                depth -= 1;
                min_depth = min_depth.min(depth);
            }
            _ => depth += 1,
        }
    }
    if min_depth < -1 {
        return Err(PathSafetyError::ExcessiveTraversal);
    }

    Ok(())
}

/// Resolve a relative path against a project root, ensuring the result
/// stays within the root. Absolute inputs and `../` traversal escapes
/// are both rejected; the returned path is always normalized.
pub fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf, String> {
    if Path::new(relative).is_absolute() {
        return Err(format!(
            "Path '{relative}' is absolute; paths must be relative to the project root"
        ));
    }
    let normalized = normalize_path(&root.join(relative));
    if !is_within_root(root, &normalized) {
        return Err(format!(
            "Path '{}' escapes project root '{}'",
            relative,
            root.display()
        ));
    }
    Ok(normalized)
}

/// Check if `path` is within `root` after normalization.
pub fn is_within_root(root: &Path, path: &Path) -> bool {
    let normalized = normalize_path(path);
    let normalized_root = normalize_path(root);
    normalized.starts_with(&normalized_root)
}

/// Normalize a path by resolving `.` and `..` components without touching
/// the filesystem. Unlike `canonicalize()`, the path does not need to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                components.pop();
            }
            std::path::Component::CurDir => {}
            other => {
                components.push(other);
            }
        }
    }
    components.iter().collect()
}
