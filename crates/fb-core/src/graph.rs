use crate::error::DependencyError;
use std::collections::HashMap;

/// Generic dependency DAG keyed by string id.
///
/// Arena model: nodes live in one flat insertion-ordered vector and
/// dependencies are stored as predecessor *ids*, never references, so the
/// graph can be copied and cycle-checked without aliasing concerns.
/// Forward references (a predecessor added later) are allowed.
///
/// Callers are expected to keep ids unique; the validator enforces this
/// before a graph is ever built.
#[derive(Debug, Clone)]
pub struct DependencyGraph<T> {
    nodes: Vec<Node<T>>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Node<T> {
    id: String,
    data: T,
    predecessors: Vec<String>,
}

impl<T> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> DependencyGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>, data: T, predecessors: Vec<String>) {
        let id = id.into();
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            id,
            data,
            predecessors,
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&i| &self.nodes[i].data)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// Resolved predecessor indices per node. Ids that reference nothing
    /// are dropped here; dependency existence is validated upstream.
    fn pred_indices(&self) -> Vec<Vec<usize>> {
        self.nodes
            .iter()
            .map(|n| {
                n.predecessors
                    .iter()
                    .filter_map(|p| self.index.get(p).copied())
                    .collect()
            })
            .collect()
    }

    /// DFS cycle detection with grey/black coloring.
    pub fn has_cycles(&self) -> bool {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let preds = self.pred_indices();
        let mut color = vec![WHITE; self.nodes.len()];

        // Iterative DFS; (node, next-pred-cursor) pairs form the stack.
        for start in 0..self.nodes.len() {
            if color[start] != WHITE {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = GREY;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if top.1 < preds[node].len() {
                    let next = preds[node][top.1];
                    top.1 += 1;
                    match color[next] {
                        GREY => return true,
                        WHITE => {
                            color[next] = GREY;
                            stack.push((next, 0));
                        }
                        _ => {}
                    }
                } else {
                    color[node] = BLACK;
                    stack.pop();
                }
            }
        }
        false
    }

    /// Dependency-respecting total order. Errors if the graph is cyclic.
    pub fn topological_sort(&self) -> Result<Vec<&str>, DependencyError> {
        let stages = self.execution_stages_impl()?;
        Ok(stages
            .into_iter()
            .flatten()
            .map(|i| self.nodes[i].id.as_str())
            .collect())
    }

    /// Layered Kahn's algorithm: each stage is the set of nodes whose
    /// predecessors are all in earlier stages, in insertion order.
    pub fn execution_stages(&self) -> Result<Vec<Vec<String>>, DependencyError> {
        Ok(self
            .execution_stages_impl()?
            .into_iter()
            .map(|stage| stage.into_iter().map(|i| self.nodes[i].id.clone()).collect())
            .collect())
    }

    fn execution_stages_impl(&self) -> Result<Vec<Vec<usize>>, DependencyError> {
        let preds = self.pred_indices();
        let mut in_degree: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (node, ps) in preds.iter().enumerate() {
            for &p in ps {
                dependents[p].push(node);
            }
        }

        let mut done = vec![false; self.nodes.len()];
        let mut remaining = self.nodes.len();
        let mut stages = Vec::new();

        while remaining > 0 {
            let stage: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| !done[i] && in_degree[i] == 0)
                .collect();
            if stage.is_empty() {
                return Err(DependencyError::Unschedulable { remaining });
            }
            for &i in &stage {
                done[i] = true;
                remaining -= 1;
                for &d in &dependents[i] {
                    in_degree[d] -= 1;
                }
            }
            stages.push(stage);
        }

        Ok(stages)
    }

    /// Ids that can never be scheduled because they sit on or behind a
    /// cycle. Empty for acyclic graphs.
    pub fn stuck_nodes(&self) -> Vec<String> {
        let preds = self.pred_indices();
        let mut in_degree: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (node, ps) in preds.iter().enumerate() {
            for &p in ps {
                dependents[p].push(node);
            }
        }

        let mut queue: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut done = vec![false; self.nodes.len()];
        while let Some(i) = queue.pop() {
            done[i] = true;
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    queue.push(d);
                }
            }
        }

        (0..self.nodes.len())
            .filter(|&i| !done[i])
            .map(|i| self.nodes[i].id.clone())
            .collect()
    }

    /// Longest dependency chain (unit edge weight), as an ordered id
    /// sequence from root to leaf. Ties break toward earlier-inserted
    /// nodes so the result is deterministic.
    pub fn critical_path(&self) -> Result<Vec<String>, DependencyError> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let preds = self.pred_indices();
        let order: Vec<usize> = self
            .execution_stages_impl()?
            .into_iter()
            .flatten()
            .collect();

        let mut dist = vec![0usize; self.nodes.len()];
        let mut via: Vec<Option<usize>> = vec![None; self.nodes.len()];
        for &node in &order {
            for &p in &preds[node] {
                if dist[p] + 1 > dist[node] {
                    dist[node] = dist[p] + 1;
                    via[node] = Some(p);
                }
            }
        }

        let mut tail = 0;
        for i in 1..self.nodes.len() {
            if dist[i] > dist[tail] {
                tail = i;
            }
        }

        let mut path = Vec::with_capacity(dist[tail] + 1);
        let mut cursor = Some(tail);
        while let Some(i) = cursor {
            path.push(self.nodes[i].id.clone());
            cursor = via[i];
        }
        path.reverse();
        Ok(path)
    }
}
