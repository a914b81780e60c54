use std::path::PathBuf;
use thiserror::Error;

/// Malformed request, caught before planning. Always fatal to the whole
/// request.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Request contains no operations")]
    EmptyRequest,

    #[error("Duplicate operation id: {0}")]
    DuplicateId(String),

    #[error("Operation {id}: {kind} requires at least one path pattern")]
    MissingPaths { id: String, kind: &'static str },

    #[error("Operation {id}: edit requires at least one file with at least one change")]
    EmptyEdit { id: String },

    #[error("Operation {id}: create requires inline content or a template name")]
    MissingContent { id: String },

    #[error("Operation {id}: validate requires at least one of commands, files, or checks")]
    EmptyValidate { id: String },

    #[error("Operation {id}: empty search pattern in {file}")]
    EmptySearchPattern { id: String, file: String },

    #[error("Operation {id}: invalid regex pattern '{pattern}' in {file}")]
    InvalidRegex {
        id: String,
        file: String,
        pattern: String,
    },

    #[error("Operation {id}: line numbers must be positive (got {line} in {file})")]
    InvalidLineNumber { id: String, file: String, line: i64 },

    #[error("Operation {id}: invalid position range {start}..{end} in {file}")]
    InvalidRange {
        id: String,
        file: String,
        start: i64,
        end: i64,
    },

    #[error("Operation {id}: '{mode}' is not an octal permission string")]
    InvalidFileMode { id: String, mode: String },

    #[error("Operation {id}: unsafe path '{path}': {reason}")]
    UnsafePath {
        id: String,
        path: String,
        reason: fb_common::PathSafetyError,
    },
}

/// Unsatisfiable or cyclic dependency graph. Fatal, caught before any
/// execution.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Operation {id} depends on non-existent operation {missing}")]
    MissingDependency { id: String, missing: String },

    #[error("Circular dependencies detected: {0}")]
    Cycle(String),

    #[error("Operation {id} reads or edits '{path}', which is deleted earlier by {deleted_by}")]
    UseAfterDelete {
        id: String,
        path: String,
        deleted_by: String,
    },

    // Raised by the staging loop if it stalls with nodes remaining;
    // unreachable when has_cycles() is checked first.
    #[error("Scheduling stuck: {remaining} operations left with no runnable node")]
    Unschedulable { remaining: usize },
}

/// A single operation's runtime failure. Non-fatal to the batch unless
/// transaction mode or the fail-fast default applies.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("No handler registered for operation type '{0}'")]
    NoHandler(&'static str),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Failed to read file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to snapshot file {path}: {source}")]
    SnapshotError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Operation cancelled before completion")]
    Cancelled,

    #[error("CRITICAL: Rollback failed for {path}: {source}. Manual intervention required.")]
    RollbackError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Atomic write failed for {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The only error surface of the top-level call: request-level problems
/// raised before any execution begins. Operation failures never land
/// here — they are captured in the response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}
