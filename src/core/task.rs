//! Task data model for the task graph.
//!
//! Tasks are the atomic units of work assigned to agents. A task is never
//! mutated in place: every transition returns a new `Task`, and the caller
//! records that value back into the graph or the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::agent::AgentId;
use crate::error::ValidationError;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id, rejecting empty or whitespace-only strings.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyId("task"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Task status in its lifecycle.
///
/// The serialized strings are part of the state file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the decomposer, not yet bound to an agent.
    #[default]
    Planned,
    /// Bound to an agent, not yet dispatched.
    Assigned,
    /// Dispatched to its agent.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (see `Task::failure`).
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Planned, TaskStatus::Assigned)
                | (TaskStatus::Planned, TaskStatus::Failed)
                | (TaskStatus::Assigned, TaskStatus::InProgress)
                | (TaskStatus::Assigned, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Planned => write!(f, "planned"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// The agent invocation returned an error.
    Error { message: String },
    /// A dependency failed, so the task was never dispatched.
    Blocked { dependency: TaskId },
    /// The run was cancelled before the task was dispatched.
    Cancelled,
    /// The agent invocation exceeded the dispatch timeout.
    Timeout { after_ms: u64 },
    /// No agent could be selected for the task.
    Unassignable { message: String },
}

impl FailureReason {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, FailureReason::Blocked { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FailureReason::Cancelled)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Error { message } => write!(f, "error: {}", message),
            FailureReason::Blocked { dependency } => write!(f, "blocked by {}", dependency),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Timeout { after_ms } => write!(f, "timed out after {}ms", after_ms),
            FailureReason::Unassignable { message } => write!(f, "unassignable: {}", message),
        }
    }
}

/// A single node in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    /// Agent bound to this task (a reference by id, not ownership).
    pub assigned_agent: Option<AgentId>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a planned task with no dependencies.
    pub fn new(id: impl Into<String>, description: &str) -> Result<Self, ValidationError> {
        let id = TaskId::new(id)?;
        if description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription(id));
        }
        Ok(Self {
            id,
            description: description.to_string(),
            status: TaskStatus::Planned,
            assigned_agent: None,
            dependencies: BTreeSet::new(),
            parent_id: None,
            required_capabilities: BTreeSet::new(),
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Return a copy that also depends on `dependency`.
    pub fn with_dependency(&self, dependency: TaskId) -> Result<Self, ValidationError> {
        if dependency == self.id {
            return Err(ValidationError::SelfDependency(self.id.clone()));
        }
        let mut next = self.clone();
        next.dependencies.insert(dependency);
        Ok(next)
    }

    /// Return a copy that also depends on every id in `dependencies`.
    pub fn with_dependencies<I>(&self, dependencies: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = TaskId>,
    {
        dependencies
            .into_iter()
            .try_fold(self.clone(), |task, dep| task.with_dependency(dep))
    }

    /// Return a copy marked as a subtask of `parent`.
    pub fn with_parent(&self, parent: TaskId) -> Result<Self, ValidationError> {
        if parent == self.id {
            return Err(ValidationError::SelfDependency(self.id.clone()));
        }
        Ok(Self {
            parent_id: Some(parent),
            ..self.clone()
        })
    }

    /// Return a copy requiring the given capability tags (lowercased).
    pub fn with_capabilities<I, S>(&self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.required_capabilities.extend(
            capabilities
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty()),
        );
        next
    }

    fn transition(&self, target: TaskStatus) -> Result<Self, ValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ValidationError::InvalidTransition {
                task: self.id.clone(),
                from: self.status,
                to: target,
            });
        }
        Ok(Self {
            status: target,
            ..self.clone()
        })
    }

    /// Bind the task to an agent: Planned -> Assigned.
    pub fn assign(&self, agent: AgentId) -> Result<Self, ValidationError> {
        let mut next = self.transition(TaskStatus::Assigned)?;
        next.assigned_agent = Some(agent);
        Ok(next)
    }

    /// Dispatch the task: Assigned -> InProgress.
    ///
    /// Dependency completion is checked by the graph, which knows the
    /// status of the other tasks.
    pub fn start(&self) -> Result<Self, ValidationError> {
        let mut next = self.transition(TaskStatus::InProgress)?;
        next.started_at = Some(Utc::now());
        Ok(next)
    }

    /// Mark the task as successfully completed: InProgress -> Completed.
    pub fn complete(&self) -> Result<Self, ValidationError> {
        let mut next = self.transition(TaskStatus::Completed)?;
        next.completed_at = Some(Utc::now());
        Ok(next)
    }

    /// Mark the task as failed with a reason.
    pub fn fail(&self, reason: FailureReason) -> Result<Self, ValidationError> {
        let mut next = self.transition(TaskStatus::Failed)?;
        next.failure = Some(reason);
        next.completed_at = Some(Utc::now());
        Ok(next)
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task failed because a dependency failed.
    pub fn is_blocked(&self) -> bool {
        self.failure.as_ref().is_some_and(FailureReason::is_blocked)
    }

    /// Check if the task was cancelled before dispatch.
    pub fn is_cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(FailureReason::is_cancelled)
    }
}
