//! Dependency graph construction and validation.
//!
//! Nodes are registered tasks, edges point from a dependency to the task
//! that depends on it ("must precede"). The graph is rebuilt from a registry
//! snapshot for every run and validated before any task executes.

use crate::core::task::{ExecutionMode, TaskRef};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Scheduling attributes of one task, copied out of the task at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub priority: i64,
    pub mode: ExecutionMode,
    pub continue_on_failure: bool,
    /// Position in the registry; breaks priority ties.
    pub registration_index: usize,
}

/// Why an edge was left out of a lenient graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnknownDependency,
    Cycle,
}

/// A declared dependency that did not make it into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEdge {
    pub task: String,
    pub dependency: String,
    pub reason: DropReason,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnPath,
    Done,
}

/// Validated, acyclic dependency graph.
pub struct DependencyGraph {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<String, NodeIndex>,
    dropped: Vec<DroppedEdge>,
}

impl DependencyGraph {
    /// Build and validate the graph for `tasks` (in registration order).
    ///
    /// With `strict`, an unknown dependency id or a cycle fails the build.
    /// Otherwise unknown ids are dropped and every back-edge that closes a
    /// cycle is removed until the graph is acyclic; see [`Self::dropped_edges`].
    ///
    /// # Errors
    /// - `Error::Validation` for duplicate task ids
    /// - `Error::UnknownDependency` / `Error::DependencyCycle` when strict
    pub fn build(tasks: &[TaskRef], strict: bool) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());

        for (registration_index, task) in tasks.iter().enumerate() {
            let id = task.id().to_string();
            if index.contains_key(&id) {
                return Err(Error::Validation(format!("duplicate task id: {}", id)));
            }
            let node = graph.add_node(TaskNode {
                id: id.clone(),
                priority: task.priority(),
                mode: task.execution_mode(),
                continue_on_failure: task.continue_on_failure(),
                registration_index,
            });
            index.insert(id, node);
        }

        let mut dropped = Vec::new();
        for task in tasks {
            let to = index[task.id()];
            for dependency in task.dependencies() {
                match index.get(dependency.as_str()) {
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None if strict => {
                        return Err(Error::UnknownDependency {
                            task: task.id().to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    None => {
                        warn!(
                            "Dropping unknown dependency {} of task {}",
                            dependency,
                            task.id()
                        );
                        dropped.push(DroppedEdge {
                            task: task.id().to_string(),
                            dependency: dependency.clone(),
                            reason: DropReason::UnknownDependency,
                        });
                    }
                }
            }
        }

        let mut dag = Self {
            graph,
            index,
            dropped,
        };

        while let Some((path, edge)) = dag.find_cycle() {
            let ids: Vec<String> = path.iter().map(|&n| dag.graph[n].id.clone()).collect();
            if strict {
                return Err(Error::DependencyCycle { path: ids });
            }

            let Some((from, to)) = dag.graph.edge_endpoints(edge) else {
                break;
            };
            let task = dag.graph[to].id.clone();
            let dependency = dag.graph[from].id.clone();
            warn!(
                "Dropping dependency {} of task {} to break cycle {}",
                dependency,
                task,
                ids.join(" -> ")
            );
            dag.graph.remove_edge(edge);
            dag.dropped.push(DroppedEdge {
                task,
                dependency,
                reason: DropReason::Cycle,
            });
        }

        Ok(dag)
    }

    /// Depth-first search with an on-path marker.
    ///
    /// Returns the cycle (first node repeated at the end) and the back-edge
    /// that closed it.
    fn find_cycle(&self) -> Option<(Vec<NodeIndex>, EdgeIndex)> {
        let count = self.graph.node_count();
        let successors: Vec<Vec<(EdgeIndex, NodeIndex)>> = self
            .graph
            .node_indices()
            .map(|node| {
                let mut out: Vec<_> = self
                    .graph
                    .edges_directed(node, Direction::Outgoing)
                    .map(|edge| (edge.id(), edge.target()))
                    .collect();
                out.sort_by_key(|&(_, target)| target.index());
                out
            })
            .collect();

        let mut state = vec![Visit::New; count];
        let mut stack: Vec<(NodeIndex, usize)> = Vec::new();

        for root in self.graph.node_indices() {
            if state[root.index()] != Visit::New {
                continue;
            }
            state[root.index()] = Visit::OnPath;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let Some(&(edge, next)) = successors[node.index()].get(top.1) else {
                    state[node.index()] = Visit::Done;
                    stack.pop();
                    continue;
                };
                top.1 += 1;

                match state[next.index()] {
                    Visit::OnPath => {
                        let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        let mut path: Vec<NodeIndex> =
                            stack[start..].iter().map(|&(n, _)| n).collect();
                        path.push(next);
                        return Some((path, edge));
                    }
                    Visit::New => {
                        state[next.index()] = Visit::OnPath;
                        stack.push((next, 0));
                    }
                    Visit::Done => {}
                }
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&n| &self.graph[n])
    }

    /// All nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    /// Ids this task waits for (validated edges only), in registration order.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&TaskNode> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        out.sort_by_key(|n| n.registration_index);
        out.into_iter().map(|n| n.id.as_str()).collect()
    }

    /// Edges removed while building a lenient graph.
    pub fn dropped_edges(&self) -> &[DroppedEdge] {
        &self.dropped
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.edge_count())
            .field("dropped", &self.dropped.len())
            .finish()
    }
}
