//! Execution results and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::agent::AgentId;
use crate::core::dag::TaskGraph;
use crate::core::message::Message;
use crate::core::task::{FailureReason, Task, TaskId, TaskStatus};
use crate::error::ValidationError;
use crate::state::CheckpointId;

/// Progress notifications published while a run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    TaskAssigned { task_id: TaskId, agent_id: AgentId },
    TaskStarted { task_id: TaskId, agent_id: AgentId },
    TaskCompleted { task_id: TaskId },
    TaskFailed { task_id: TaskId, reason: FailureReason },
    RunFinished { completed: usize, failed: usize },
}

/// One status transition observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub agent: Option<AgentId>,
    pub at: DateTime<Utc>,
}

/// How a run ended, for runs that were not aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    FullyCompleted,
    /// `failed` counts every task that did not complete, blocked and
    /// cancelled tasks included.
    PartiallyCompleted { failed: usize },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::FullyCompleted => write!(f, "fully completed"),
            RunStatus::PartiallyCompleted { failed } => {
                write!(f, "partially completed with {} failed task(s)", failed)
            }
        }
    }
}

/// Per-task outcome of one run. A single failure never aborts the run; it
/// is recorded here instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Final task values in graph insertion order.
    pub tasks: Vec<Task>,
    pub messages: Vec<Message>,
    pub trace: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Checkpoint taken after the run was persisted.
    pub checkpoint: Option<CheckpointId>,
}

impl ExecutionReport {
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    /// Tasks that were dispatched (or unassignable) and failed on their own.
    pub fn failed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed && !t.is_blocked() && !t.is_cancelled())
            .count()
    }

    pub fn blocked_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_blocked()).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_cancelled()).count()
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    pub fn status(&self) -> RunStatus {
        let failed = self.tasks.len() - self.completed_count();
        if failed == 0 {
            RunStatus::FullyCompleted
        } else {
            RunStatus::PartiallyCompleted { failed }
        }
    }

    /// Ids of every task that did not complete.
    pub fn failed_task_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Whether every InProgress transition in the trace came after all of
    /// the task's dependencies had been recorded Completed.
    pub fn trace_respects_dependencies(&self) -> bool {
        let deps: HashMap<&TaskId, &Task> = self.tasks.iter().map(|t| (&t.id, t)).collect();
        let mut completed: HashSet<&TaskId> = HashSet::new();
        for entry in &self.trace {
            match entry.status {
                TaskStatus::Completed => {
                    completed.insert(&entry.task_id);
                }
                TaskStatus::InProgress => {
                    let Some(task) = deps.get(&entry.task_id) else {
                        return false;
                    };
                    if !task.dependencies.iter().all(|d| completed.contains(d)) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }

    /// A fresh graph holding a copy of every task that did not complete.
    ///
    /// Copies get id `<old>-retry<N>` and `parent_id` set to the old id.
    /// Dependencies on completed tasks are dropped; dependencies between
    /// retried tasks point at the new copies.
    pub fn retry_graph(&self) -> Result<TaskGraph, ValidationError> {
        let failed: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .cloned()
            .collect();
        retry_subset(&failed)
    }
}

/// Retry copies of `tasks`. Dependencies outside `tasks` are treated as
/// satisfied.
pub(crate) fn retry_subset(tasks: &[Task]) -> Result<TaskGraph, ValidationError> {
    let retried: HashMap<&TaskId, TaskId> = tasks
        .iter()
        .map(|t| Ok::<_, ValidationError>((&t.id, retry_id(&t.id)?)))
        .collect::<Result<_, ValidationError>>()?;

    let copies = tasks
        .iter()
        .map(|old| {
            let deps = old
                .dependencies
                .iter()
                .filter_map(|d| retried.get(d).cloned());
            Ok::<_, ValidationError>(
                Task::new(retried[&old.id].as_str(), &old.description)?
                    .with_parent(old.id.clone())?
                    .with_dependencies(deps)?
                    .with_capabilities(&old.required_capabilities),
            )
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    TaskGraph::from_tasks(copies)
}

/// `design` -> `design-retry1`, `design-retry1` -> `design-retry2`.
fn retry_id(id: &TaskId) -> Result<TaskId, ValidationError> {
    let (base, attempt) = match id.as_str().rsplit_once("-retry") {
        Some((base, n)) => match n.parse::<u32>() {
            Ok(n) => (base, n + 1),
            Err(_) => (id.as_str(), 1),
        },
        None => (id.as_str(), 1),
    };
    TaskId::new(format!("{}-retry{}", base, attempt))
}
