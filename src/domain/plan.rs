//! Typed plan model and dependency-order computation
//!
//! A `PlanSpec` is what the planner agent produces: a summary, a set of tasks
//! with dependencies, and a layered `execution_order` where each layer can run
//! in parallel and layer *k* depends only on layers before it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Estimated complexity of a planned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

/// One task in a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannedTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub files: Vec<String>,
    pub est_complexity: Complexity,
    pub priority: i32,
}

impl Default for PlannedTask {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            depends_on: Vec::new(),
            files: Vec::new(),
            est_complexity: Complexity::default(),
            priority: 0,
        }
    }
}

/// A plan: summary, tasks, and the layered execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSpec {
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    /// Layers of task IDs; each inner list is runnable in parallel
    pub execution_order: Vec<Vec<String>>,
}

impl PlanSpec {
    /// Build a plan from tasks, computing the execution order
    pub fn new(summary: impl Into<String>, tasks: Vec<PlannedTask>) -> Result<Self, PlanError> {
        let execution_order = compute_execution_order(&tasks)?;
        Ok(Self {
            summary: summary.into(),
            tasks,
            execution_order,
        })
    }

    pub fn task(&self, id: &str) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut PlannedTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Re-validate the DAG and recompute layers after a mutation
    pub fn recompute_order(&mut self) -> Result<(), PlanError> {
        self.execution_order = compute_execution_order(&self.tasks)?;
        Ok(())
    }
}

/// Plan validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("task {task} depends on unknown task {dep}")]
    UnknownDependency { task: String, dep: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Validate a task dependency graph for duplicates, dangling deps, and cycles
///
/// Cycle detection is DFS with a recursion stack; the error carries the
/// offending path.
pub fn validate_dependency_graph(tasks: &[PlannedTask]) -> Result<(), PlanError> {
    let mut by_id: HashMap<&str, &PlannedTask> = HashMap::new();
    for task in tasks {
        if by_id.insert(task.id.as_str(), task).is_some() {
            return Err(PlanError::DuplicateId(task.id.clone()));
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for id in by_id.keys() {
        if !visited.contains(id) && has_cycle_dfs(id, &by_id, &mut visited, &mut rec_stack, &mut path) {
            return Err(PlanError::Cycle(path));
        }
    }

    Ok(())
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a PlannedTask>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node.to_string());

    if let Some(task) = graph.get(node) {
        for dep in &task.depends_on {
            if !visited.contains(dep.as_str()) {
                if has_cycle_dfs(dep.as_str(), graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep.as_str()) {
                path.push(dep.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Compute the layered execution order by Kahn's algorithm
///
/// Each layer holds every task whose dependencies are all in earlier layers.
/// Within a layer, tasks are ordered by priority descending, then ID
/// ascending. The layers partition the task set exactly.
pub fn compute_execution_order(tasks: &[PlannedTask]) -> Result<Vec<Vec<String>>, PlanError> {
    validate_dependency_graph(tasks)?;

    let mut placed: HashSet<&str> = HashSet::new();
    let mut layers: Vec<Vec<String>> = Vec::new();

    while placed.len() < tasks.len() {
        let mut layer: Vec<&PlannedTask> = tasks
            .iter()
            .filter(|t| !placed.contains(t.id.as_str()))
            .filter(|t| t.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .collect();

        // Cycles were ruled out above, so an empty layer cannot happen; bail
        // defensively anyway rather than spin.
        if layer.is_empty() {
            let remaining = tasks
                .iter()
                .filter(|t| !placed.contains(t.id.as_str()))
                .map(|t| t.id.clone())
                .collect();
            return Err(PlanError::Cycle(remaining));
        }

        layer.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        for task in &layer {
            placed.insert(task.id.as_str());
        }
        layers.push(layer.into_iter().map(|t| t.id.clone()).collect());
    }

    Ok(layers)
}
