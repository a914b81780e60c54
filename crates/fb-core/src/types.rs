use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level input to the batch executor: a set of declarative operations
/// plus run-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<Operation>,

    #[serde(default)]
    pub options: RequestOptions,
}

/// Run-wide execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Allow intra-stage parallelism. Default: true.
    pub parallel: bool,

    /// All-or-nothing mode: snapshot before mutation, roll back on any
    /// failure. Default: false.
    pub transaction: bool,

    /// Run every operation even after failures. Default: false (fail-fast).
    pub continue_on_error: bool,

    /// Shape of the per-operation detail in the response.
    pub return_format: ReturnFormat,

    /// Content-cache behavior for handlers during this run.
    pub cache_strategy: fb_common::CacheStrategy,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            transaction: false,
            continue_on_error: false,
            return_format: ReturnFormat::default(),
            cache_strategy: fb_common::CacheStrategy::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnFormat {
    /// Summary counts only; per-operation detail omitted.
    Minimal,
    /// Typed per-operation summaries.
    #[default]
    Structured,
    /// Structured plus the full output payload of every operation.
    Raw,
}

/// One declarative operation in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique within the request. Auto-generated from a content hash when
    /// absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Ids of operations that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(flatten)]
    pub kind: OperationKind,
}

/// The closed set of operation shapes. New operation types extend this
/// enum and the exhaustive matches in the validator and engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    /// Inspect files without mutating them.
    Analyze {
        paths: Vec<String>,
        #[serde(default)]
        query: Option<String>,
    },
    /// Apply change lists to existing files.
    Edit { edits: Vec<FileEdit> },
    /// Create a new file from inline content or a named template.
    Create {
        file: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        template: Option<String>,
        /// Octal permission string, e.g. "644".
        #[serde(default)]
        mode: Option<String>,
    },
    /// Remove files matching glob patterns.
    Delete { paths: Vec<String> },
    /// Run validation commands/checks against files.
    Validate {
        #[serde(default)]
        commands: Vec<String>,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        checks: Vec<String>,
    },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Analyze { .. } => "analyze",
            OperationKind::Edit { .. } => "edit",
            OperationKind::Create { .. } => "create",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Validate { .. } => "validate",
        }
    }

    /// Whether this kind mutates the filesystem.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::Edit { .. } | OperationKind::Create { .. } | OperationKind::Delete { .. }
        )
    }

    /// Every path (or pattern, for delete) this operation targets.
    pub fn target_paths(&self) -> Vec<&str> {
        match self {
            OperationKind::Analyze { paths, .. } => paths.iter().map(String::as_str).collect(),
            OperationKind::Edit { edits } => edits.iter().map(|e| e.file.as_str()).collect(),
            OperationKind::Create { file, .. } => vec![file.as_str()],
            OperationKind::Delete { paths } => paths.iter().map(String::as_str).collect(),
            OperationKind::Validate { files, .. } => files.iter().map(String::as_str).collect(),
        }
    }
}

/// Change list for one file inside an edit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEdit {
    pub file: String,
    pub changes: Vec<Change>,
}

/// One textual change. Numeric fields stay signed so the validator — not
/// the deserializer — rejects negative values with a useful message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Change {
    FindReplace {
        find: String,
        replace: String,
        /// Treat `find` as a regular expression.
        #[serde(default)]
        regex: bool,
        /// Replace every occurrence instead of the first.
        #[serde(default)]
        all: bool,
    },
    Line {
        /// 1-based line number.
        line: i64,
        action: LineAction,
        #[serde(default)]
        content: Option<String>,
    },
    Position {
        /// Byte offset range `start..end` replaced by `text`.
        start: i64,
        end: i64,
        text: String,
    },
    AstTransform {
        transform: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        args: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineAction {
    Insert,
    Replace,
    Delete,
}

// ── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of one operation. Exactly one of these exists per submitted
/// operation, in request order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Overall disposition of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every operation succeeded (or failures were tolerated).
    Completed,
    /// At least one operation failed; completed work was kept.
    Failed,
    /// A failure under transaction mode; all mutations undone.
    RolledBack,
    /// Cancelled mid-flight; unstarted operations were skipped.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_operations: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub files_affected: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub phase: String,
    pub message: String,
}

/// Aggregated result of a batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// True iff no operation failed, or failures were tolerated via
    /// continue-on-error.
    pub success: bool,
    pub status: BatchStatus,
    pub results: Vec<OperationResult>,
    pub summary: BatchSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<OperationErrorDetail>,
    /// Human-readable synthesis: unified diffs for small successful runs,
    /// a textual breakdown otherwise.
    pub report: String,
}
