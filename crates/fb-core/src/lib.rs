//! Dependency-aware batched file-operation execution.
//!
//! A batch request carries a set of typed operations (analyze, edit,
//! create, delete, validate) with optional `dependsOn` edges. The
//! pipeline validates the request, derives a staged execution plan from
//! the dependency DAG, runs stages sequentially with bounded
//! parallelism inside each stage, and shapes the settled results into a
//! response. Transaction mode snapshots every mutated file up front and
//! restores all of them if anything fails.

pub mod engine;
pub mod error;
pub mod file_ops;
pub mod graph;
pub mod handlers;
pub mod planner;
pub mod response;
pub mod snapshot;
pub mod types;
pub mod validate;

pub use engine::{
    CancelHandle, ExecutionContext, ExecutionOutcome, ProgressEvent, ProgressFn,
};
pub use error::{DependencyError, OperationError, RequestError, ValidationError};
pub use handlers::{HandlerContext, HandlerRegistry, OperationHandler};
pub use planner::{ExecutionPlan, GroupKind, OperationGroup, Stage};
pub use response::ResponseBuilder;
pub use types::{
    BatchRequest, BatchResponse, BatchStatus, BatchSummary, Change, FileEdit, LineAction,
    Operation, OperationErrorDetail, OperationKind, OperationResult, OperationStatus,
    RequestOptions, ReturnFormat,
};
pub use validate::{ValidatedOperation, ValidatedRequest};

use tracing::debug;

/// Plan a batch without executing it: validation plus DAG analysis.
pub fn plan_batch(request: &BatchRequest) -> Result<ExecutionPlan, RequestError> {
    let validated = validate::validate(request)?;
    planner::plan(&validated)
}

/// Run a batch end to end: validate, plan, execute, build the response.
///
/// Errors out only for request-level problems (schema, path safety,
/// dependency resolution); once execution starts, every failure is
/// reported inside the returned [`BatchResponse`].
pub async fn execute_batch(
    request: &BatchRequest,
    ctx: &ExecutionContext,
) -> Result<BatchResponse, RequestError> {
    let validated = validate::validate(request)?;
    let plan = planner::plan(&validated)?;
    debug!(
        operations = validated.operations.len(),
        stages = plan.stages.len(),
        "executing batch"
    );
    let outcome = engine::execute(&validated, &plan, ctx).await;
    let response =
        ResponseBuilder::new(&ctx.root, validated.options.return_format).build(outcome);
    Ok(response)
}
