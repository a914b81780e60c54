//! Filesystem-backed handlers for the integration suites. Deliberately
//! small: enough semantics to exercise planning, execution, rollback,
//! and reporting end to end.

use async_trait::async_trait;
use fb_core::file_ops::atomic_write;
use fb_core::{
    Change, HandlerContext, HandlerRegistry, LineAction, OperationError, OperationHandler,
    OperationKind, ValidatedOperation,
};
use regex::Regex;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;

pub fn fs_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("analyze", Arc::new(AnalyzeHandler));
    registry.register("edit", Arc::new(EditHandler));
    registry.register("create", Arc::new(CreateHandler));
    registry.register("delete", Arc::new(DeleteHandler));
    registry.register("validate", Arc::new(ValidateHandler));
    registry
}

pub struct AnalyzeHandler;

#[async_trait]
impl OperationHandler for AnalyzeHandler {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError> {
        let OperationKind::Analyze { paths, .. } = &operation.kind else {
            return Err(OperationError::Handler("expected analyze payload".into()));
        };
        let mut entries = Vec::new();
        for path in paths {
            let absolute = ctx.resolve(path)?;
            let exists = absolute.exists();
            let size = fs::metadata(&absolute).map(|m| m.len()).unwrap_or(0);
            entries.push(json!({ "path": path, "exists": exists, "size": size }));
        }
        Ok(json!({ "entries": entries }))
    }
}

pub struct CreateHandler;

#[async_trait]
impl OperationHandler for CreateHandler {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError> {
        let OperationKind::Create { file, content, .. } = &operation.kind else {
            return Err(OperationError::Handler("expected create payload".into()));
        };
        let absolute = ctx.resolve(file)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(|source| OperationError::WriteError {
                path: absolute.clone(),
                source,
            })?;
        }
        let body = content.clone().unwrap_or_default();
        atomic_write(&absolute, body.as_bytes())?;
        Ok(json!({ "created": file }))
    }
}

pub struct EditHandler;

#[async_trait]
impl OperationHandler for EditHandler {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError> {
        let OperationKind::Edit { edits } = &operation.kind else {
            return Err(OperationError::Handler("expected edit payload".into()));
        };
        let mut applied = 0usize;
        for edit in edits {
            let absolute = ctx.resolve(&edit.file)?;
            let mut content =
                fs::read_to_string(&absolute).map_err(|source| OperationError::ReadError {
                    path: absolute.clone(),
                    source,
                })?;
            for change in &edit.changes {
                content = apply_change(&content, change)?;
                applied += 1;
            }
            atomic_write(&absolute, content.as_bytes())?;
        }
        Ok(json!({ "changesApplied": applied }))
    }
}

pub struct DeleteHandler;

#[async_trait]
impl OperationHandler for DeleteHandler {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError> {
        let OperationKind::Delete { paths } = &operation.kind else {
            return Err(OperationError::Handler("expected delete payload".into()));
        };
        let mut removed = Vec::new();
        for pattern in paths {
            let full = ctx.root.join(pattern);
            let matches =
                glob::glob(&full.to_string_lossy()).map_err(|source| OperationError::BadPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            for entry in matches.flatten() {
                if entry.is_file() {
                    fs::remove_file(&entry)
                        .map_err(|e| OperationError::Handler(e.to_string()))?;
                    removed.push(entry.to_string_lossy().into_owned());
                }
            }
        }
        Ok(json!({ "removed": removed.len() }))
    }
}

pub struct ValidateHandler;

#[async_trait]
impl OperationHandler for ValidateHandler {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError> {
        let OperationKind::Validate { files, .. } = &operation.kind else {
            return Err(OperationError::Handler("expected validate payload".into()));
        };
        for file in files {
            let absolute = ctx.resolve(file)?;
            if !absolute.exists() {
                return Err(OperationError::Handler(format!(
                    "validation failed: {file} does not exist"
                )));
            }
        }
        Ok(json!({ "validated": files.len() }))
    }
}

fn apply_change(content: &str, change: &Change) -> Result<String, OperationError> {
    match change {
        Change::FindReplace {
            find,
            replace,
            regex,
            all,
        } => {
            if *regex {
                let re =
                    Regex::new(find).map_err(|e| OperationError::Handler(e.to_string()))?;
                if *all {
                    Ok(re.replace_all(content, replace.as_str()).into_owned())
                } else {
                    Ok(re.replace(content, replace.as_str()).into_owned())
                }
            } else if *all {
                Ok(content.replace(find, replace))
            } else {
                Ok(content.replacen(find, replace, 1))
            }
        }
        Change::Line {
            line,
            action,
            content: text,
        } => {
            let mut lines: Vec<&str> = content.lines().collect();
            let idx = (*line as usize).saturating_sub(1);
            match action {
                LineAction::Insert => {
                    let at = idx.min(lines.len());
                    lines.insert(at, text.as_deref().unwrap_or(""));
                }
                LineAction::Replace => {
                    if idx >= lines.len() {
                        return Err(OperationError::Handler(format!(
                            "line {line} out of range"
                        )));
                    }
                    lines[idx] = text.as_deref().unwrap_or("");
                }
                LineAction::Delete => {
                    if idx >= lines.len() {
                        return Err(OperationError::Handler(format!(
                            "line {line} out of range"
                        )));
                    }
                    lines.remove(idx);
                }
            }
            let mut rebuilt = lines.join("\n");
            if content.ends_with('\n') {
                rebuilt.push('\n');
            }
            Ok(rebuilt)
        }
        Change::Position { start, end, text } => {
            let start = (*start as usize).min(content.len());
            let end = (*end as usize).clamp(start, content.len());
            let mut rebuilt = String::with_capacity(content.len());
            rebuilt.push_str(&content[..start]);
            rebuilt.push_str(text);
            rebuilt.push_str(&content[end..]);
            Ok(rebuilt)
        }
        Change::AstTransform { transform, .. } => Err(OperationError::Handler(format!(
            "ast transform '{transform}' not supported by this handler set"
        ))),
    }
}
