//! Stage-sequential execution engine.
//!
//! Stages run strictly in order. Within a stage, operations are
//! partitioned into conflict lanes: two operations sharing a target
//! path where at least one writes always land in the same lane and run
//! sequentially in submission order. Distinct lanes run concurrently,
//! bounded by a semaphore. Snapshots are captured before every
//! mutation; under transaction mode a failure restores them all in
//! reverse capture order.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use fb_common::{CacheStrategy, FileCache};
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};

use crate::error::OperationError;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::planner::{operations_conflict, ExecutionPlan};
use crate::snapshot::SnapshotSet;
use crate::types::{
    BatchStatus, OperationErrorDetail, OperationKind, OperationResult, OperationStatus,
};
use crate::validate::{ValidatedOperation, ValidatedRequest};

const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Emitted after each operation settles, in completion order.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub operation_id: String,
    pub kind: String,
    pub status: OperationStatus,
    pub message: String,
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Cancels a running batch. Cheap to clone; safe to trigger from any
/// thread. Operations already in flight finish; nothing new starts.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Everything the engine needs beyond the request itself: the project
/// root, the handler set, and optional hooks.
pub struct ExecutionContext {
    pub root: PathBuf,
    pub handlers: HandlerRegistry,
    pub max_concurrency: usize,
    pub progress: Option<ProgressFn>,
    /// Shared across batches when the request asks for persistent caching.
    pub cache: Option<Arc<FileCache>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutionContext {
    pub fn new(root: impl Into<PathBuf>, handlers: HandlerRegistry) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            root: root.into(),
            handlers,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            progress: None,
            cache: None,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel_tx.clone())
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cache(mut self, cache: Arc<FileCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Raw material for the response builder: settled results in request
/// order plus the pre-mutation images needed for diff rendering.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub results: Vec<OperationResult>,
    pub status: BatchStatus,
    pub duration_ms: u64,
    /// Relative paths of files mutated by successful operations, sorted.
    pub files_affected: Vec<String>,
    pub errors: Vec<OperationErrorDetail>,
    /// Relative path to pre-run content; `None` means the file did not
    /// exist before this batch.
    pub before_images: HashMap<String, Option<Vec<u8>>>,
}

struct EngineState {
    results: Vec<Option<OperationResult>>,
    statuses: HashMap<String, OperationStatus>,
    touched: BTreeSet<String>,
}

struct Shared {
    root: PathBuf,
    handlers: HandlerRegistry,
    cancel: watch::Receiver<bool>,
    cache: Option<Arc<FileCache>>,
    progress: Option<ProgressFn>,
    semaphore: Semaphore,
    state: Mutex<EngineState>,
    snapshots: Mutex<SnapshotSet>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run a planned batch to completion. Never fails at the call level:
/// every problem past validation is captured inside the outcome.
pub async fn execute(
    request: &ValidatedRequest,
    plan: &ExecutionPlan,
    ctx: &ExecutionContext,
) -> ExecutionOutcome {
    let started = Instant::now();
    let options = &request.options;

    let cache = match options.cache_strategy {
        CacheStrategy::None => None,
        CacheStrategy::Session => Some(Arc::new(FileCache::new())),
        CacheStrategy::Persistent => {
            Some(ctx.cache.clone().unwrap_or_else(|| Arc::new(FileCache::new())))
        }
    };

    let limit = if options.parallel {
        ctx.max_concurrency.max(1)
    } else {
        1
    };

    let shared = Arc::new(Shared {
        root: ctx.root.clone(),
        handlers: ctx.handlers.clone(),
        cancel: ctx.cancel_rx.clone(),
        cache,
        progress: ctx.progress.clone(),
        semaphore: Semaphore::new(limit),
        state: Mutex::new(EngineState {
            results: vec![None; request.operations.len()],
            statuses: HashMap::new(),
            touched: BTreeSet::new(),
        }),
        snapshots: Mutex::new(SnapshotSet::new(&ctx.root)),
    });

    let mut cancelled = false;
    for stage in &plan.stages {
        if *shared.cancel.borrow() {
            cancelled = true;
            break;
        }

        let mut ops: Vec<ValidatedOperation> = stage
            .operations
            .iter()
            .filter_map(|id| request.operation(id).cloned())
            .collect();
        ops.sort_by_key(|op| op.index);
        debug!(stage = stage.index, operations = ops.len(), "starting stage");

        if limit == 1 {
            for op in ops {
                run_operation(op, &shared).await;
            }
        } else {
            let lanes = partition_lanes(&ops);
            let tasks: Vec<_> = lanes
                .into_iter()
                .map(|lane| {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        for op in lane {
                            run_operation(op, &shared).await;
                        }
                    })
                })
                .collect();
            for joined in join_all(tasks).await {
                if let Err(e) = joined {
                    warn!("execution lane task failed to join: {e}");
                }
            }
        }

        if *shared.cancel.borrow() {
            cancelled = true;
            break;
        }
        let stage_failed = {
            let state = lock(&shared.state);
            stage.operations.iter().any(|id| {
                state.statuses.get(id.as_str()) == Some(&OperationStatus::Failed)
            })
        };
        if stage_failed && !options.continue_on_error {
            break;
        }
    }

    // Everything without a result never started.
    let skip_reason = if cancelled {
        "cancelled before start"
    } else {
        "skipped: an earlier stage failed"
    };
    {
        let mut state = lock(&shared.state);
        for op in &request.operations {
            if state.results[op.index].is_none() {
                state.statuses.insert(op.id.clone(), OperationStatus::Skipped);
                state.results[op.index] = Some(OperationResult {
                    operation_id: op.id.clone(),
                    kind: op.kind.name().to_string(),
                    status: OperationStatus::Skipped,
                    output: None,
                    error: Some(skip_reason.to_string()),
                    duration_ms: 0,
                });
            }
        }
    }

    let mut state = lock(&shared.state);
    let results: Vec<OperationResult> = state
        .results
        .iter_mut()
        .map(|slot| slot.take().unwrap_or_else(|| OperationResult {
            operation_id: String::new(),
            kind: String::new(),
            status: OperationStatus::Failed,
            output: None,
            error: Some("internal: result slot never filled".to_string()),
            duration_ms: 0,
        }))
        .collect();
    let touched: Vec<String> = state.touched.iter().cloned().collect();
    drop(state);

    let any_failed = results
        .iter()
        .any(|r| r.status == OperationStatus::Failed);

    let mut errors: Vec<OperationErrorDetail> = results
        .iter()
        .filter(|r| r.status == OperationStatus::Failed)
        .map(|r| OperationErrorDetail {
            operation_id: Some(r.operation_id.clone()),
            phase: "execute".to_string(),
            message: r.error.clone().unwrap_or_else(|| "unknown failure".to_string()),
        })
        .collect();

    let snapshots = lock(&shared.snapshots);
    // Failures tolerated by continue-on-error leave the batch Completed.
    let mut status = if cancelled {
        BatchStatus::Cancelled
    } else if any_failed && !options.continue_on_error {
        BatchStatus::Failed
    } else {
        BatchStatus::Completed
    };

    let rolled_back = options.transaction && (any_failed || cancelled);
    if rolled_back {
        match snapshots.restore_all() {
            Ok(()) => {
                if any_failed {
                    status = BatchStatus::RolledBack;
                }
            }
            Err(e) => {
                error!("rollback failed: {e}");
                if any_failed {
                    status = BatchStatus::RolledBack;
                }
                errors.push(OperationErrorDetail {
                    operation_id: None,
                    phase: "rollback".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    let before_images: HashMap<String, Option<Vec<u8>>> = snapshots
        .paths()
        .filter_map(|path| {
            let snapshot = snapshots.get(path)?;
            let relative = path
                .strip_prefix(&ctx.root)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            Some((relative, snapshot.content.clone()))
        })
        .collect();

    // Restored files were not, in the end, affected.
    let files_affected = if rolled_back { Vec::new() } else { touched };

    ExecutionOutcome {
        results,
        status,
        duration_ms: started.elapsed().as_millis() as u64,
        files_affected,
        errors,
        before_images,
    }
}

/// Group a stage's operations so that conflicting ones share a lane.
/// Lanes preserve submission order; an operation conflicting with
/// several lanes merges them.
fn partition_lanes(ops: &[ValidatedOperation]) -> Vec<Vec<ValidatedOperation>> {
    let mut lanes: Vec<Vec<ValidatedOperation>> = Vec::new();
    for op in ops {
        let hits: Vec<usize> = lanes
            .iter()
            .enumerate()
            .filter(|(_, lane)| {
                lane.iter()
                    .any(|other| operations_conflict(&other.kind, &op.kind))
            })
            .map(|(i, _)| i)
            .collect();
        match hits.first().copied() {
            None => lanes.push(vec![op.clone()]),
            Some(first) => {
                for &i in hits.iter().skip(1).rev() {
                    let merged = lanes.remove(i);
                    lanes[first].extend(merged);
                }
                lanes[first].push(op.clone());
                lanes[first].sort_by_key(|o| o.index);
            }
        }
    }
    lanes
}

async fn run_operation(op: ValidatedOperation, shared: &Arc<Shared>) {
    if *shared.cancel.borrow() {
        record(shared, &op, OperationStatus::Skipped, None, Some("cancelled before start".to_string()), 0);
        return;
    }

    // A dependency that failed or was skipped makes this operation moot.
    let blocked = {
        let state = lock(&shared.state);
        op.depends_on.iter().find_map(|dep| {
            match state.statuses.get(dep.as_str()) {
                Some(OperationStatus::Success) => None,
                _ => Some(dep.clone()),
            }
        })
    };
    if let Some(dep) = blocked {
        record(
            shared,
            &op,
            OperationStatus::Skipped,
            None,
            Some(format!("skipped: dependency '{dep}' did not succeed")),
            0,
        );
        return;
    }

    let _permit = shared.semaphore.acquire().await.ok();
    let started = Instant::now();

    let targets = match resolve_targets(&shared.root, &op.kind) {
        Ok(t) => t,
        Err(e) => {
            record(shared, &op, OperationStatus::Failed, None, Some(e.to_string()), elapsed(started));
            return;
        }
    };

    if op.kind.is_write() {
        let mut snapshots = lock(&shared.snapshots);
        for (absolute, _) in &targets {
            if let Err(e) = snapshots.capture(absolute) {
                drop(snapshots);
                record(shared, &op, OperationStatus::Failed, None, Some(e.to_string()), elapsed(started));
                return;
            }
        }
    }

    let handler = match shared.handlers.get(op.kind.name()) {
        Some(h) => h,
        None => {
            let e = OperationError::NoHandler(op.kind.name());
            record(shared, &op, OperationStatus::Failed, None, Some(e.to_string()), elapsed(started));
            return;
        }
    };

    let hctx = HandlerContext::new(
        shared.root.clone(),
        shared.cancel.clone(),
        shared.cache.clone(),
    );
    match handler.run(&op, &hctx).await {
        Ok(output) => {
            if op.kind.is_write() {
                let mut state = lock(&shared.state);
                for (_, relative) in &targets {
                    state.touched.insert(relative.clone());
                }
            }
            record(shared, &op, OperationStatus::Success, Some(output), None, elapsed(started));
        }
        Err(e) => {
            record(shared, &op, OperationStatus::Failed, None, Some(e.to_string()), elapsed(started));
        }
    }
}

fn elapsed(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Resolve an operation's target paths to normalized absolute form,
/// expanding delete patterns against the filesystem. Returns (absolute,
/// root-relative) pairs; the relative form is the single spelling used
/// for `files_affected` and the before-image keys.
fn resolve_targets(
    root: &std::path::Path,
    kind: &OperationKind,
) -> Result<Vec<(PathBuf, String)>, OperationError> {
    let relative_to_root = |absolute: &std::path::Path| -> String {
        absolute
            .strip_prefix(root)
            .unwrap_or(absolute)
            .to_string_lossy()
            .into_owned()
    };

    let mut resolved = Vec::new();
    match kind {
        OperationKind::Delete { paths } => {
            for pattern in paths {
                let full = fb_common::normalize_path(&root.join(pattern));
                if !fb_common::is_within_root(root, &full) {
                    return Err(OperationError::Handler(format!(
                        "Pattern '{}' escapes project root '{}'",
                        pattern,
                        root.display()
                    )));
                }
                let full_str = full.to_string_lossy();
                let matches = glob::glob(&full_str).map_err(|source| {
                    OperationError::BadPattern {
                        pattern: pattern.clone(),
                        source,
                    }
                })?;
                let mut any = false;
                for entry in matches.flatten() {
                    if !fb_common::is_within_root(root, &entry) {
                        continue;
                    }
                    any = true;
                    let relative = relative_to_root(&entry);
                    resolved.push((entry, relative));
                }
                // A literal path with nothing on disk still names a target;
                // the handler decides whether that is an error.
                if !any && !pattern.contains(['*', '?', '[']) {
                    let relative = relative_to_root(&full);
                    resolved.push((full, relative));
                }
            }
        }
        _ => {
            for path in kind.target_paths() {
                let absolute = fb_common::resolve_within_root(root, path)
                    .map_err(OperationError::Handler)?;
                let relative = relative_to_root(&absolute);
                resolved.push((absolute, relative));
            }
        }
    }
    Ok(resolved)
}

fn record(
    shared: &Arc<Shared>,
    op: &ValidatedOperation,
    status: OperationStatus,
    output: Option<serde_json::Value>,
    error: Option<String>,
    duration_ms: u64,
) {
    {
        let mut state = lock(&shared.state);
        state.statuses.insert(op.id.clone(), status);
        state.results[op.index] = Some(OperationResult {
            operation_id: op.id.clone(),
            kind: op.kind.name().to_string(),
            status,
            output,
            error: error.clone(),
            duration_ms,
        });
    }
    if let Some(progress) = &shared.progress {
        let message = match status {
            OperationStatus::Success => {
                format!("{} '{}' completed in {}ms", op.kind.name(), op.id, duration_ms)
            }
            OperationStatus::Failed => format!(
                "{} '{}' failed: {}",
                op.kind.name(),
                op.id,
                error.as_deref().unwrap_or("unknown")
            ),
            OperationStatus::Skipped => format!(
                "{} '{}' skipped: {}",
                op.kind.name(),
                op.id,
                error.as_deref().unwrap_or("not run")
            ),
        };
        progress(ProgressEvent {
            operation_id: op.id.clone(),
            kind: op.kind.name().to_string(),
            status,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::OperationHandler;
    use crate::planner::plan;
    use crate::types::{BatchRequest, Operation, RequestOptions};
    use crate::validate::validate;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(ops: &[&str], options: RequestOptions) -> ValidatedRequest {
        let operations: Vec<Operation> = ops
            .iter()
            .map(|json| serde_json::from_str(json).unwrap())
            .collect();
        validate(&BatchRequest { operations, options }).unwrap()
    }

    /// Handler that records invocation order and fails on request.
    struct Scripted {
        fail_ids: Vec<&'static str>,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl OperationHandler for Scripted {
        async fn run(
            &self,
            operation: &ValidatedOperation,
            _ctx: &HandlerContext,
        ) -> Result<Value, OperationError> {
            lock(&self.order).push(operation.id.clone());
            if self.fail_ids.contains(&operation.id.as_str()) {
                return Err(OperationError::Handler("scripted failure".to_string()));
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn scripted_registry(
        fail_ids: Vec<&'static str>,
    ) -> (HandlerRegistry, Arc<Mutex<Vec<String>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for kind in ["analyze", "edit", "create", "delete", "validate"] {
            registry.register(
                kind,
                Arc::new(Scripted {
                    fail_ids: fail_ids.clone(),
                    order: order.clone(),
                }),
            );
        }
        (registry, order)
    }

    #[tokio::test]
    async fn test_results_come_back_in_request_order() {
        let req = request(
            &[
                r#"{"id":"c","type":"create","file":"c.txt","content":"c"}"#,
                r#"{"id":"a","type":"analyze","paths":["src"]}"#,
                r#"{"id":"b","type":"create","file":"b.txt","content":"b"}"#,
            ],
            RequestOptions::default(),
        );
        let p = plan(&req).unwrap();
        let (registry, _) = scripted_registry(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        let outcome = execute(&req, &p, &ctx).await;
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(outcome.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_operation_is_skipped() {
        let req = request(
            &[
                r#"{"id":"first","type":"create","file":"a.txt","content":"x"}"#,
                r#"{"id":"second","type":"edit","dependsOn":["first"],"edits":[{"file":"a.txt","changes":[{"type":"find-replace","find":"x","replace":"y"}]}]}"#,
            ],
            RequestOptions {
                continue_on_error: true,
                ..RequestOptions::default()
            },
        );
        let p = plan(&req).unwrap();
        let (registry, _) = scripted_registry(vec!["first"]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.results[0].status, OperationStatus::Failed);
        assert_eq!(outcome.results[1].status, OperationStatus::Skipped);
        assert!(outcome.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("dependency 'first'"));
    }

    #[tokio::test]
    async fn test_failure_halts_later_stages_without_continue_on_error() {
        let req = request(
            &[
                r#"{"id":"one","type":"create","file":"a.txt","content":"x"}"#,
                r#"{"id":"two","type":"create","dependsOn":["one"],"file":"b.txt","content":"y"}"#,
                r#"{"id":"three","type":"create","dependsOn":["two"],"file":"c.txt","content":"z"}"#,
            ],
            RequestOptions::default(),
        );
        let p = plan(&req).unwrap();
        let (registry, order) = scripted_registry(vec!["one"]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(lock(&order).len(), 1);
        assert_eq!(outcome.results[1].status, OperationStatus::Skipped);
        assert_eq!(outcome.results[2].status, OperationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_going_and_reports_completed() {
        let req = request(
            &[
                r#"{"id":"bad","type":"create","file":"a.txt","content":"x"}"#,
                r#"{"id":"good","type":"create","file":"b.txt","content":"y"}"#,
            ],
            RequestOptions {
                continue_on_error: true,
                ..RequestOptions::default()
            },
        );
        let p = plan(&req).unwrap();
        let (registry, _) = scripted_registry(vec!["bad"]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.results[0].status, OperationStatus::Failed);
        assert_eq!(outcome.results[1].status, OperationStatus::Success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].phase, "execute");
    }

    #[tokio::test]
    async fn test_missing_handler_fails_the_operation() {
        let req = request(
            &[r#"{"id":"a","type":"analyze","paths":["src"]}"#],
            RequestOptions::default(),
        );
        let p = plan(&req).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), HandlerRegistry::new());
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.results[0].status, OperationStatus::Failed);
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("No handler registered"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let req = request(
            &[
                r#"{"id":"a","type":"create","file":"a.txt","content":"x"}"#,
                r#"{"id":"b","type":"create","file":"b.txt","content":"y"}"#,
            ],
            RequestOptions::default(),
        );
        let p = plan(&req).unwrap();
        let (registry, order) = scripted_registry(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        ctx.cancel_handle().cancel();
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.status, BatchStatus::Cancelled);
        assert!(outcome.results.iter().all(|r| r.status == OperationStatus::Skipped));
        assert!(lock(&order).is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_writes_share_a_lane() {
        // Both ops target out.txt; a real-filesystem appender proves they
        // never interleave even under full parallelism.
        struct Appender;

        #[async_trait]
        impl OperationHandler for Appender {
            async fn run(
                &self,
                operation: &ValidatedOperation,
                ctx: &HandlerContext,
            ) -> Result<Value, OperationError> {
                let path = ctx.root.join("out.txt");
                let existing = std::fs::read_to_string(&path).unwrap_or_default();
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                std::fs::write(&path, format!("{existing}{}\n", operation.id))
                    .map_err(|e| OperationError::Handler(e.to_string()))?;
                Ok(Value::Null)
            }
        }

        let req = request(
            &[
                r#"{"id":"w1","type":"create","file":"out.txt","content":"a"}"#,
                r#"{"id":"w2","type":"create","file":"out.txt","content":"b"}"#,
            ],
            RequestOptions::default(),
        );
        let p = plan(&req).unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register("create", Arc::new(Appender));
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        let outcome = execute(&req, &p, &ctx).await;
        assert_eq!(outcome.status, BatchStatus::Completed);
        // Sequential lane execution means both appends survive.
        let content = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content, "w1\nw2\n");
    }

    #[tokio::test]
    async fn test_parallel_false_runs_in_submission_order() {
        let req = request(
            &[
                r#"{"id":"p1","type":"create","file":"a.txt","content":"a"}"#,
                r#"{"id":"p2","type":"create","file":"b.txt","content":"b"}"#,
                r#"{"id":"p3","type":"create","file":"c.txt","content":"c"}"#,
            ],
            RequestOptions {
                parallel: false,
                ..RequestOptions::default()
            },
        );
        let p = plan(&req).unwrap();
        let (registry, order) = scripted_registry(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry);
        execute(&req, &p, &ctx).await;
        assert_eq!(*lock(&order), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_concurrency_respects_semaphore_limit() {
        struct Gauge {
            current: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl OperationHandler for Gauge {
            async fn run(
                &self,
                _operation: &ValidatedOperation,
                _ctx: &HandlerContext,
            ) -> Result<Value, OperationError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let ops: Vec<String> = (0..6)
            .map(|i| {
                format!(r#"{{"id":"g{i}","type":"create","file":"f{i}.txt","content":"x"}}"#)
            })
            .collect();
        let refs: Vec<&str> = ops.iter().map(String::as_str).collect();
        let req = request(&refs, RequestOptions::default());
        let p = plan(&req).unwrap();

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            "create",
            Arc::new(Gauge {
                current: current.clone(),
                peak: peak.clone(),
            }),
        );
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), registry).with_max_concurrency(2);
        execute(&req, &p, &ctx).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_partition_lanes_merges_transitive_conflicts() {
        let req = request(
            &[
                r#"{"id":"x","type":"edit","edits":[{"file":"a.txt","changes":[{"type":"find-replace","find":"1","replace":"2"}]}]}"#,
                r#"{"id":"y","type":"create","file":"b.txt","content":"b"}"#,
                r#"{"id":"z","type":"edit","edits":[{"file":"a.txt","changes":[{"type":"find-replace","find":"3","replace":"4"}]},{"file":"b.txt","changes":[{"type":"find-replace","find":"5","replace":"6"}]}]}"#,
            ],
            RequestOptions::default(),
        );
        let lanes = partition_lanes(&req.operations);
        // z conflicts with both earlier lanes, so everything merges.
        assert_eq!(lanes.len(), 1);
        let ids: Vec<&str> = lanes[0].iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_resolve_targets_rejects_escaping_delete_pattern() {
        // A single parent segment passes request-path safety, so the
        // engine must still refuse to expand it outside the root.
        let kind = OperationKind::Delete {
            paths: vec!["../*".to_string()],
        };
        let err = resolve_targets(std::path::Path::new("/project"), &kind).unwrap_err();
        assert!(err.to_string().contains("escapes project root"));
    }

    #[test]
    fn test_resolve_targets_normalizes_redundant_segments() {
        let kind = OperationKind::Create {
            file: "src/../a.txt".to_string(),
            content: Some("x".to_string()),
            template: None,
            mode: None,
        };
        let targets = resolve_targets(std::path::Path::new("/project"), &kind).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, std::path::PathBuf::from("/project/a.txt"));
        assert_eq!(targets[0].1, "a.txt");
    }

    #[test]
    fn test_partition_lanes_keeps_independent_ops_apart() {
        let req = request(
            &[
                r#"{"id":"m","type":"create","file":"a.txt","content":"a"}"#,
                r#"{"id":"n","type":"create","file":"b.txt","content":"b"}"#,
            ],
            RequestOptions::default(),
        );
        let lanes = partition_lanes(&req.operations);
        assert_eq!(lanes.len(), 2);
    }
}
