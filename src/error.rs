use std::time::Duration;

use thiserror::Error;

use crate::core::agent::AgentKind;
use crate::core::task::{TaskId, TaskStatus};

/// A malformed domain value or a forbidden state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} id must not be empty")]
    EmptyId(&'static str),

    #[error("Task {0} has an empty description")]
    EmptyDescription(TaskId),

    #[error("Task {0} cannot depend on itself")]
    SelfDependency(TaskId),

    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task} cannot start: dependency {dependency} is not completed")]
    DependencyNotCompleted { task: TaskId, dependency: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Dependency cycle detected at task: {0}")]
    CyclicDependency(TaskId),

    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    #[error("Task {task} dependency set changed on update")]
    DependenciesChanged { task: TaskId },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("Invalid keyword rule: {0}")]
    InvalidRule(String),
}

/// No eligible agent for a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No candidate agents")]
    NoCandidates,

    #[error("No candidate agent of kind {0}")]
    NoMatchingAgent(AgentKind),

    #[error("No candidate agent covers the capabilities of task {0}")]
    NoCapableAgent(TaskId),
}

/// A request could not be expanded into a valid task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompositionError {
    #[error("Unknown request kind: {0}")]
    UnknownKind(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Template for {kind} is malformed: {reason}")]
    MalformedTemplate { kind: String, reason: String },

    #[error("Decomposed graph is cyclic at task: {0}")]
    CyclicGraph(TaskId),

    #[error(transparent)]
    Validation(ValidationError),
}

impl From<ValidationError> for DecompositionError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::CyclicDependency(task) => Self::CyclicGraph(task),
            other => Self::Validation(other),
        }
    }
}

/// Executor-level failure that aborts a whole run.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Scheduler deadlock: {} task(s) can never run: {pending:?}", .pending.len())]
    Deadlock { pending: Vec<TaskId> },

    #[error("Execution invariant violated: {0}")]
    Invariant(#[from] ValidationError),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// The external agent host failed to produce an outcome.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Agent invocation failed: {0}")]
    Failed(String),

    #[error("Agent command exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("Failed to spawn agent command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Agent invocation timed out after {0:?}")]
    Timeout(Duration),
}

/// Loading or saving orchestration state failed.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Creating or restoring a checkpoint failed.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Checkpoint already exists: {0}")]
    Exists(String),

    #[error("Invalid checkpoint id: {0:?}")]
    InvalidId(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Version control ref error: {0}")]
    Ref(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<tokio::task::JoinError> for StateError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CheckpointError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::State(StateError::from(err))
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        Self::State(StateError::Io(err))
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::State(StateError::Json(err))
    }
}

/// Structural failures that abort an orchestration run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),

    #[error("Execution aborted: {0}")]
    Execution(#[from] ExecutionError),

    #[error("State store unavailable: {0}")]
    State(#[from] StateError),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Agent host not available: {0}")]
    AgentHostNotAvailable(String),
}

pub type OrchestratorError = Error;

pub type Result<T> = std::result::Result<T, Error>;
