use crate::error::{DependencyError, RequestError};
use crate::graph::DependencyGraph;
use crate::types::OperationKind;
use crate::validate::{ValidatedOperation, ValidatedRequest};
use std::collections::HashMap;

/// Relative cost units per operation kind, used only for duration
/// estimates and scheduling hints.
fn kind_cost(kind: &OperationKind) -> u64 {
    match kind {
        OperationKind::Analyze { .. } => 200,
        OperationKind::Create { .. } => 150,
        OperationKind::Edit { .. } => 100,
        OperationKind::Delete { .. } => 50,
        OperationKind::Validate { .. } => 300,
    }
}

/// Scheduling priority for same-type grouping: reads before writes,
/// deletes last.
fn kind_priority(kind: &str) -> u8 {
    match kind {
        "analyze" => 0,
        "validate" => 1,
        "create" => 2,
        "edit" => 3,
        "delete" => 4,
        _ => 5,
    }
}

/// One execution stage: all operations whose dependencies are satisfied
/// by earlier stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    pub operations: Vec<String>,
    pub can_run_in_parallel: bool,
    pub estimated_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKind {
    /// Operations touching the same path.
    FileLocality { path: String },
    /// Operations sharing an operation type.
    SameType { kind: String },
    /// A maximal single-predecessor/single-dependent chain.
    DependencyChain,
}

/// Advisory grouping hint. Groups never change execution semantics, only
/// the order the engine may prefer within a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationGroup {
    pub kind: GroupKind,
    pub operations: Vec<String>,
    pub parallelizable: bool,
}

/// Derived execution plan: stages, advisory groups, and critical path.
/// Read-only once built.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
    pub groups: Vec<OperationGroup>,
    pub critical_path: Vec<String>,
    pub estimated_duration: u64,
    pub parallelization_opportunities: usize,
}

/// Build an execution plan from a validated request.
///
/// The DAG carries explicit `dependsOn` edges only. Same-file conflicts
/// between independent operations are NOT promoted to edges; they stay in
/// one stage and the engine serializes them at runtime, so the reported
/// critical path reflects declared dependencies alone.
pub fn plan(request: &ValidatedRequest) -> Result<ExecutionPlan, RequestError> {
    let mut graph: DependencyGraph<usize> = DependencyGraph::new();
    for op in &request.operations {
        graph.add_node(op.id.clone(), op.index, op.depends_on.clone());
    }

    // Cycles are a fatal input error; fail before any planning output.
    if graph.has_cycles() {
        let stuck = graph.stuck_nodes();
        return Err(DependencyError::Cycle(stuck.join(", ")).into());
    }

    let stage_ids = graph.execution_stages()?;
    let critical_path = graph.critical_path()?;

    let by_id: HashMap<&str, &ValidatedOperation> = request
        .operations
        .iter()
        .map(|op| (op.id.as_str(), op))
        .collect();

    let mut stages = Vec::with_capacity(stage_ids.len());
    for (index, operations) in stage_ids.into_iter().enumerate() {
        let ops: Vec<&ValidatedOperation> =
            operations.iter().map(|id| by_id[id.as_str()]).collect();
        stages.push(Stage {
            index,
            can_run_in_parallel: operations.len() > 1 && can_parallelize(&ops),
            estimated_duration: 0,
            operations,
        });
    }

    let groups = build_groups(&request.operations);

    let mut plan = ExecutionPlan {
        stages,
        groups,
        critical_path,
        estimated_duration: 0,
        parallelization_opportunities: 0,
    };
    optimize_execution_plan(&mut plan, request);
    Ok(plan)
}

/// Re-estimate stage durations from the per-kind cost table and recount
/// parallelization opportunities. Attached metadata only; membership and
/// ordering never change.
pub fn optimize_execution_plan(plan: &mut ExecutionPlan, request: &ValidatedRequest) {
    let by_id: HashMap<&str, &ValidatedOperation> = request
        .operations
        .iter()
        .map(|op| (op.id.as_str(), op))
        .collect();

    let mut total = 0;
    let mut opportunities = 0;
    for stage in &mut plan.stages {
        let costs = stage
            .operations
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|op| kind_cost(&op.kind));
        stage.estimated_duration = if stage.can_run_in_parallel {
            costs.max().unwrap_or(0)
        } else {
            costs.sum()
        };
        total += stage.estimated_duration;
        if stage.can_run_in_parallel {
            opportunities += 1;
        }
    }
    plan.estimated_duration = total;
    plan.parallelization_opportunities = opportunities;
}

/// Whether a set of operations is safe to advertise as parallel: false as
/// soon as any write-kind operation shares a target path with another
/// operation in the set.
pub fn can_parallelize(ops: &[&ValidatedOperation]) -> bool {
    for (i, a) in ops.iter().enumerate() {
        for b in &ops[i + 1..] {
            if operations_conflict(&a.kind, &b.kind) {
                return false;
            }
        }
    }
    true
}

/// Two operations conflict when they share a target path and at least one
/// of the pair mutates it. Delete patterns are matched as globs against
/// the other side's concrete paths.
pub(crate) fn operations_conflict(a: &OperationKind, b: &OperationKind) -> bool {
    if !a.is_write() && !b.is_write() {
        return false;
    }
    let a_paths = a.target_paths();
    let b_paths = b.target_paths();
    for pa in &a_paths {
        for pb in &b_paths {
            // Lexical normalization so "sub/../a.txt" and "a.txt" are
            // recognized as the same target.
            let na = fb_common::normalize_path(std::path::Path::new(pa));
            let nb = fb_common::normalize_path(std::path::Path::new(pb));
            if na == nb
                || (matches!(a, OperationKind::Delete { .. }) && glob_matches(pa, pb))
                || (matches!(b, OperationKind::Delete { .. }) && glob_matches(pb, pa))
            {
                return true;
            }
        }
    }
    false
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(path))
        .unwrap_or(false)
}

/// Predecessor id when `op` forms a link in a linear chain: exactly one
/// dependency, and that dependency has `op` as its only dependent.
fn chained_pred<'a>(
    op: &'a ValidatedOperation,
    dependent_count: &HashMap<&str, usize>,
) -> Option<&'a str> {
    if op.depends_on.len() != 1 {
        return None;
    }
    let pred = op.depends_on[0].as_str();
    (dependent_count.get(pred).copied() == Some(1)).then_some(pred)
}

fn build_groups(operations: &[ValidatedOperation]) -> Vec<OperationGroup> {
    let mut groups = Vec::new();

    // File-locality groups, largest first.
    let mut by_path: HashMap<&str, Vec<&ValidatedOperation>> = HashMap::new();
    for op in operations {
        for path in op.kind.target_paths() {
            by_path.entry(path).or_default().push(op);
        }
    }
    let mut locality: Vec<(&str, Vec<&ValidatedOperation>)> = by_path
        .into_iter()
        .filter(|(_, ops)| ops.len() > 1)
        .collect();
    locality.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));
    for (path, ops) in locality {
        groups.push(OperationGroup {
            kind: GroupKind::FileLocality {
                path: path.to_string(),
            },
            parallelizable: can_parallelize(&ops),
            operations: ops.iter().map(|o| o.id.clone()).collect(),
        });
    }

    // Same-type groups in fixed priority order.
    let mut by_kind: HashMap<&'static str, Vec<&ValidatedOperation>> = HashMap::new();
    for op in operations {
        by_kind.entry(op.kind.name()).or_default().push(op);
    }
    let mut typed: Vec<(&'static str, Vec<&ValidatedOperation>)> = by_kind
        .into_iter()
        .filter(|(_, ops)| ops.len() > 1)
        .collect();
    typed.sort_by_key(|(kind, _)| kind_priority(kind));
    for (kind, ops) in typed {
        groups.push(OperationGroup {
            kind: GroupKind::SameType {
                kind: kind.to_string(),
            },
            parallelizable: can_parallelize(&ops),
            operations: ops.iter().map(|o| o.id.clone()).collect(),
        });
    }

    // Maximal dependency chains: runs of single-predecessor operations
    // whose predecessor has that operation as its only dependent.
    let mut dependent_count: HashMap<&str, usize> = HashMap::new();
    for op in operations {
        for dep in &op.depends_on {
            *dependent_count.entry(dep.as_str()).or_default() += 1;
        }
    }
    // Chain heads: operations that are chained to nothing, but have a
    // chained successor somewhere below them.
    let mut in_chain: HashMap<&str, &str> = HashMap::new();
    for op in operations {
        if let Some(pred) = chained_pred(op, &dependent_count) {
            in_chain.insert(pred, op.id.as_str());
        }
    }
    for op in operations {
        let starts_chain = chained_pred(op, &dependent_count).is_none()
            && in_chain.contains_key(op.id.as_str());
        if !starts_chain {
            continue;
        }
        let mut chain = vec![op.id.clone()];
        let mut cursor = op.id.as_str();
        while let Some(&next) = in_chain.get(cursor) {
            chain.push(next.to_string());
            cursor = next;
        }
        if chain.len() > 1 {
            groups.push(OperationGroup {
                kind: GroupKind::DependencyChain,
                operations: chain,
                parallelizable: false,
            });
        }
    }

    groups
}
