use crate::error::{DependencyError, RequestError, ValidationError};
use crate::types::{BatchRequest, Change, OperationKind, RequestOptions};
use fb_common::check_path_safety;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// An operation that passed validation, with its id materialized.
#[derive(Debug, Clone)]
pub struct ValidatedOperation {
    pub id: String,
    pub depends_on: Vec<String>,
    pub kind: OperationKind,
    /// Position in the original request; results are emitted in this order.
    pub index: usize,
}

/// A request that passed schema, semantic, and dependency validation.
/// Read-only from here on: the planner and engine never mutate it.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub operations: Vec<ValidatedOperation>,
    pub options: RequestOptions,
    index_by_id: HashMap<String, usize>,
}

impl ValidatedRequest {
    pub fn operation(&self, id: &str) -> Option<&ValidatedOperation> {
        self.index_by_id.get(id).map(|&i| &self.operations[i])
    }
}

/// Validate a raw request: schema-level checks, per-operation semantic
/// checks, path safety, dependency existence, and the delete-then-use
/// conflict pre-check. Nothing executes until this succeeds.
pub fn validate(request: &BatchRequest) -> Result<ValidatedRequest, RequestError> {
    if request.operations.is_empty() {
        return Err(ValidationError::EmptyRequest.into());
    }

    // Materialize ids first so every later error can name its operation.
    let ids = assign_ids(request)?;

    let mut operations = Vec::with_capacity(request.operations.len());
    for (index, op) in request.operations.iter().enumerate() {
        let id = &ids[index];
        check_operation(id, &op.kind)?;
        operations.push(ValidatedOperation {
            id: id.clone(),
            depends_on: op.depends_on.clone(),
            kind: op.kind.clone(),
            index,
        });
    }

    let index_by_id: HashMap<String, usize> = operations
        .iter()
        .map(|op| (op.id.clone(), op.index))
        .collect();

    // Dependency existence: every referenced id must be in this request.
    for op in &operations {
        for dep in &op.depends_on {
            if !index_by_id.contains_key(dep) {
                return Err(DependencyError::MissingDependency {
                    id: op.id.clone(),
                    missing: dep.clone(),
                }
                .into());
            }
        }
    }

    check_delete_conflicts(&operations, &index_by_id)?;

    Ok(ValidatedRequest {
        operations,
        options: request.options.clone(),
        index_by_id,
    })
}

/// Explicit ids are taken as-is (duplicates rejected); missing ids are
/// derived from a content hash of the payload, so the same operation gets
/// the same id on every run. Identical payloads are disambiguated by
/// request position.
fn assign_ids(request: &BatchRequest) -> Result<Vec<String>, ValidationError> {
    let mut used: HashSet<String> = HashSet::new();
    for op in &request.operations {
        if let Some(id) = &op.id {
            if !used.insert(id.clone()) {
                return Err(ValidationError::DuplicateId(id.clone()));
            }
        }
    }

    let mut ids = Vec::with_capacity(request.operations.len());
    for (index, op) in request.operations.iter().enumerate() {
        let id = match &op.id {
            Some(id) => id.clone(),
            None => {
                let base = content_id(&op.kind, index);
                if used.contains(&base) {
                    format!("{base}-{index}")
                } else {
                    base
                }
            }
        };
        used.insert(id.clone());
        ids.push(id);
    }
    Ok(ids)
}

fn content_id(kind: &OperationKind, index: usize) -> String {
    match serde_json::to_vec(kind) {
        Ok(bytes) => {
            let digest = Sha256::digest(&bytes);
            format!("op-{}", &hex::encode(digest)[..12])
        }
        Err(_) => format!("op-{index}"),
    }
}

/// Per-kind semantic and field-level checks. Exhaustive over the closed
/// variant set; new operation kinds extend this match.
fn check_operation(id: &str, kind: &OperationKind) -> Result<(), ValidationError> {
    match kind {
        OperationKind::Analyze { paths, .. } => {
            if paths.is_empty() {
                return Err(ValidationError::MissingPaths {
                    id: id.to_string(),
                    kind: "analyze",
                });
            }
            check_paths(id, paths.iter().map(String::as_str))?;
        }
        OperationKind::Edit { edits } => {
            if edits.is_empty() || edits.iter().any(|e| e.changes.is_empty()) {
                return Err(ValidationError::EmptyEdit { id: id.to_string() });
            }
            for edit in edits {
                check_paths(id, std::iter::once(edit.file.as_str()))?;
                for change in &edit.changes {
                    check_change(id, &edit.file, change)?;
                }
            }
        }
        OperationKind::Create {
            file,
            content,
            template,
            mode,
        } => {
            if content.is_none() && template.is_none() {
                return Err(ValidationError::MissingContent { id: id.to_string() });
            }
            check_paths(id, std::iter::once(file.as_str()))?;
            if let Some(mode) = mode {
                let octal = (3..=4).contains(&mode.len())
                    && mode.bytes().all(|b| (b'0'..=b'7').contains(&b));
                if !octal {
                    return Err(ValidationError::InvalidFileMode {
                        id: id.to_string(),
                        mode: mode.clone(),
                    });
                }
            }
        }
        OperationKind::Delete { paths } => {
            if paths.is_empty() {
                return Err(ValidationError::MissingPaths {
                    id: id.to_string(),
                    kind: "delete",
                });
            }
            check_paths(id, paths.iter().map(String::as_str))?;
        }
        OperationKind::Validate {
            commands,
            files,
            checks,
        } => {
            if commands.is_empty() && files.is_empty() && checks.is_empty() {
                return Err(ValidationError::EmptyValidate { id: id.to_string() });
            }
            check_paths(id, files.iter().map(String::as_str))?;
        }
    }
    Ok(())
}

fn check_paths<'a>(
    id: &str,
    paths: impl Iterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    for path in paths {
        check_path_safety(path).map_err(|reason| ValidationError::UnsafePath {
            id: id.to_string(),
            path: path.to_string(),
            reason,
        })?;
    }
    Ok(())
}

fn check_change(id: &str, file: &str, change: &Change) -> Result<(), ValidationError> {
    match change {
        Change::FindReplace { find, regex, .. } => {
            if find.is_empty() {
                return Err(ValidationError::EmptySearchPattern {
                    id: id.to_string(),
                    file: file.to_string(),
                });
            }
            if *regex && regex::Regex::new(find).is_err() {
                return Err(ValidationError::InvalidRegex {
                    id: id.to_string(),
                    file: file.to_string(),
                    pattern: find.clone(),
                });
            }
        }
        Change::Line { line, .. } => {
            if *line <= 0 {
                return Err(ValidationError::InvalidLineNumber {
                    id: id.to_string(),
                    file: file.to_string(),
                    line: *line,
                });
            }
        }
        Change::Position { start, end, .. } => {
            if *start < 0 || start > end {
                return Err(ValidationError::InvalidRange {
                    id: id.to_string(),
                    file: file.to_string(),
                    start: *start,
                    end: *end,
                });
            }
        }
        Change::AstTransform { .. } => {}
    }
    Ok(())
}

/// Reject operations that read or edit a path which a (transitive)
/// dependency is guaranteed to have deleted first. That is a logic error
/// in the request, not a race to resolve at runtime.
fn check_delete_conflicts(
    operations: &[ValidatedOperation],
    index_by_id: &HashMap<String, usize>,
) -> Result<(), DependencyError> {
    for op in operations {
        let read_paths: Vec<&str> = match &op.kind {
            OperationKind::Analyze { paths, .. } => paths.iter().map(String::as_str).collect(),
            OperationKind::Edit { edits } => edits.iter().map(|e| e.file.as_str()).collect(),
            _ => continue,
        };

        // Walk the transitive dependsOn closure. Cycles are caught later
        // by the planner; a visited set keeps this walk finite either way.
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack: Vec<usize> = op
            .depends_on
            .iter()
            .filter_map(|d| index_by_id.get(d).copied())
            .collect();

        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let ancestor = &operations[idx];
            if let OperationKind::Delete { paths } = &ancestor.kind {
                for pattern in paths {
                    for read in &read_paths {
                        if delete_matches(pattern, read) {
                            return Err(DependencyError::UseAfterDelete {
                                id: op.id.clone(),
                                path: read.to_string(),
                                deleted_by: ancestor.id.clone(),
                            });
                        }
                    }
                }
            }
            stack.extend(
                ancestor
                    .depends_on
                    .iter()
                    .filter_map(|d| index_by_id.get(d).copied()),
            );
        }
    }
    Ok(())
}

/// Delete patterns are globs; an unparsable pattern degrades to literal
/// comparison.
fn delete_matches(pattern: &str, path: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(path),
        Err(_) => pattern == path,
    }
}
