//! Task graph for dependency management.
//!
//! `TaskGraph` stores tasks as petgraph nodes with an edge from each
//! dependency to its dependent. It is validated on construction (unique ids,
//! known dependencies, no cycles) and enforces the dependency invariant when
//! a task value is recorded back into it.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::ValidationError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// The task dependency graph.
#[derive(Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from tasks whose dependencies reference each other.
    ///
    /// Tasks may appear in any order. Fails on a duplicate id, a dependency
    /// that names no task in the list, or a cycle.
    pub fn from_tasks<I>(tasks: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Task>,
    {
        let mut dag = Self::new();
        for task in tasks {
            if dag.task_index.contains_key(&task.id) {
                return Err(ValidationError::DuplicateTask(task.id));
            }
            let id = task.id.clone();
            let index = dag.graph.add_node(task);
            dag.task_index.insert(id, index);
        }

        let mut edges = Vec::new();
        for index in dag.graph.node_indices() {
            let task = &dag.graph[index];
            for dep in &task.dependencies {
                let dep_index = dag.task_index.get(dep).ok_or_else(|| {
                    ValidationError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                edges.push((*dep_index, index));
            }
        }
        for (from, to) in edges {
            dag.graph.add_edge(from, to, ());
        }

        dag.validate()?;
        Ok(dag)
    }

    /// Add a task whose dependencies are already in the graph.
    pub fn add_task(&mut self, task: Task) -> Result<NodeIndex, ValidationError> {
        if self.task_index.contains_key(&task.id) {
            return Err(ValidationError::DuplicateTask(task.id));
        }
        let dep_indices = task
            .dependencies
            .iter()
            .map(|dep| {
                self.task_index
                    .get(dep)
                    .copied()
                    .ok_or_else(|| ValidationError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = task.id.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        for dep_index in dep_indices {
            self.graph.add_edge(dep_index, index, ());
        }
        Ok(index)
    }

    /// Check that the graph is acyclic.
    pub fn validate(&self) -> Result<(), ValidationError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            ValidationError::CyclicDependency(self.graph[cycle.node_id()].id.clone())
        })
    }

    /// Get a task by its ID.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Consume the graph, returning tasks in insertion order.
    pub fn into_tasks(self) -> Vec<Task> {
        let (nodes, _) = self.graph.into_nodes_edges();
        nodes.into_iter().map(|node| node.weight).collect()
    }

    /// Tasks that `id` depends on, in insertion order.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that depend on `id`, in insertion order.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&Task> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut indices: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        indices.sort();
        indices.dedup();
        indices.into_iter().map(|i| &self.graph[i]).collect()
    }

    /// Task ids in dependency order.
    ///
    /// Kahn's algorithm with ties broken by insertion order, so the result
    /// is the same for identical graphs.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, ValidationError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| in_degree[i.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(index) = ready.pop_first() {
            order.push(self.graph[index].id.clone());
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.len() {
            let stuck = self
                .graph
                .node_indices()
                .find(|i| in_degree[i.index()] > 0)
                .map(|i| self.graph[i].id.clone());
            if let Some(id) = stuck {
                return Err(ValidationError::CyclicDependency(id));
            }
        }
        Ok(order)
    }

    /// Whether every dependency of `id` is Completed.
    pub fn dependencies_completed(&self, id: &TaskId) -> bool {
        self.dependencies_of(id)
            .iter()
            .all(|dep| dep.status == TaskStatus::Completed)
    }

    /// The first dependency of `id` that ended Failed, if any.
    pub fn failed_dependency(&self, id: &TaskId) -> Option<TaskId> {
        self.dependencies_of(id)
            .into_iter()
            .find(|dep| dep.status == TaskStatus::Failed)
            .map(|dep| dep.id.clone())
    }

    /// Planned tasks whose dependencies are all Completed, in insertion order.
    pub fn ready(&self) -> Vec<&Task> {
        self.tasks()
            .filter(|task| task.status == TaskStatus::Planned)
            .filter(|task| self.dependencies_completed(&task.id))
            .collect()
    }

    /// Record a new value for an existing task.
    ///
    /// The dependency set must be unchanged, and a task may only enter
    /// InProgress once all of its dependencies are Completed.
    pub fn replace(&mut self, task: Task) -> Result<(), ValidationError> {
        let index = *self
            .task_index
            .get(&task.id)
            .ok_or_else(|| ValidationError::UnknownTask(task.id.clone()))?;
        let current = &self.graph[index];
        if current.dependencies != task.dependencies {
            return Err(ValidationError::DependenciesChanged { task: task.id });
        }
        if task.status == TaskStatus::InProgress && current.status != TaskStatus::InProgress {
            if let Some(dep) = self
                .dependencies_of(&task.id)
                .into_iter()
                .find(|dep| dep.status != TaskStatus::Completed)
            {
                return Err(ValidationError::DependencyNotCompleted {
                    task: task.id.clone(),
                    dependency: dep.id.clone(),
                });
            }
        }
        self.graph[index] = task;
        Ok(())
    }

    /// Whether no task is left Planned, Assigned or InProgress.
    pub fn is_finished(&self) -> bool {
        self.tasks().all(Task::is_finished)
    }

    /// Ids of tasks that are not yet terminal, in insertion order.
    pub fn unfinished(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|task| !task.is_finished())
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks().filter(|task| task.status == status).count()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
