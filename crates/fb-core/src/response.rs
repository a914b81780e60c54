//! Shapes an execution outcome into the response surface: per-operation
//! detail trimmed to the requested format, aggregate summary, and a
//! human-readable report (unified diffs for small successful runs).

use std::fs;
use std::path::Path;

use similar::TextDiff;

use crate::engine::ExecutionOutcome;
use crate::types::{
    BatchResponse, BatchStatus, BatchSummary, OperationStatus, ReturnFormat,
};

/// Above this many affected files the report falls back to a textual
/// breakdown instead of inline diffs.
const MAX_DIFF_FILES: usize = 5;

pub struct ResponseBuilder<'a> {
    root: &'a Path,
    format: ReturnFormat,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(root: &'a Path, format: ReturnFormat) -> Self {
        Self { root, format }
    }

    pub fn build(self, outcome: ExecutionOutcome) -> BatchResponse {
        let successful = count(&outcome, OperationStatus::Success);
        let failed = count(&outcome, OperationStatus::Failed);
        let skipped = count(&outcome, OperationStatus::Skipped);

        let summary = BatchSummary {
            total_operations: outcome.results.len(),
            successful,
            failed,
            skipped,
            duration_ms: outcome.duration_ms,
            files_affected: outcome.files_affected.clone(),
        };

        let report = self.render_report(&outcome, &summary);

        let results = match self.format {
            ReturnFormat::Minimal => Vec::new(),
            ReturnFormat::Structured => outcome
                .results
                .into_iter()
                .map(|mut r| {
                    r.output = None;
                    r
                })
                .collect(),
            ReturnFormat::Raw => outcome.results,
        };

        BatchResponse {
            success: outcome.status == BatchStatus::Completed,
            status: outcome.status,
            results,
            summary,
            errors: outcome.errors,
            report,
        }
    }

    fn render_report(&self, outcome: &ExecutionOutcome, summary: &BatchSummary) -> String {
        let diffable = outcome.status == BatchStatus::Completed
            && !outcome.files_affected.is_empty()
            && outcome.files_affected.len() <= MAX_DIFF_FILES;
        if diffable {
            self.render_diffs(outcome)
        } else {
            self.render_breakdown(outcome, summary)
        }
    }

    fn render_diffs(&self, outcome: &ExecutionOutcome) -> String {
        let mut report = String::new();
        for path in &outcome.files_affected {
            let before = outcome
                .before_images
                .get(path)
                .and_then(|content| content.as_ref())
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            let after = fs::read_to_string(self.root.join(path)).ok();

            if before.is_none() && after.is_none() {
                continue;
            }
            let old = before.as_deref().unwrap_or("");
            let new = after.as_deref().unwrap_or("");
            if old == new {
                continue;
            }
            let diff = TextDiff::from_lines(old, new);
            report.push_str(
                &diff
                    .unified_diff()
                    .context_radius(3)
                    .header(&format!("a/{path}"), &format!("b/{path}"))
                    .to_string(),
            );
            report.push('\n');
        }
        if report.is_empty() {
            "No content changes.".to_string()
        } else {
            report
        }
    }

    fn render_breakdown(&self, outcome: &ExecutionOutcome, summary: &BatchSummary) -> String {
        let mut lines = Vec::new();
        let headline = match outcome.status {
            BatchStatus::Completed => "Batch completed",
            BatchStatus::Failed => "Batch failed",
            BatchStatus::RolledBack => "Batch failed; all changes rolled back",
            BatchStatus::Cancelled => "Batch cancelled",
        };
        lines.push(format!(
            "{}: {}/{} succeeded, {} failed, {} skipped ({}ms)",
            headline,
            summary.successful,
            summary.total_operations,
            summary.failed,
            summary.skipped,
            summary.duration_ms,
        ));

        let mut created = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        for path in &outcome.files_affected {
            let existed_before = outcome
                .before_images
                .get(path)
                .map(|c| c.is_some())
                .unwrap_or(true);
            let exists_now = self.root.join(path).exists();
            match (existed_before, exists_now) {
                (false, true) => created.push(path.as_str()),
                (true, false) => deleted.push(path.as_str()),
                _ => modified.push(path.as_str()),
            }
        }
        for (label, paths) in [
            ("Created", created),
            ("Modified", modified),
            ("Deleted", deleted),
        ] {
            if !paths.is_empty() {
                lines.push(format!("{label}: {}", paths.join(", ")));
            }
        }

        let failures: Vec<String> = outcome
            .results
            .iter()
            .filter(|r| r.status == OperationStatus::Failed)
            .map(|r| {
                format!(
                    "  {} ({}): {}",
                    r.operation_id,
                    r.kind,
                    r.error.as_deref().unwrap_or("unknown failure"),
                )
            })
            .collect();
        if !failures.is_empty() {
            lines.push("Failures:".to_string());
            lines.extend(failures);
        }

        lines.join("\n")
    }
}

fn count(outcome: &ExecutionOutcome, status: OperationStatus) -> usize {
    outcome
        .results
        .iter()
        .filter(|r| r.status == status)
        .count()
}
