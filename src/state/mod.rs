//! Persistent orchestration state and checkpoints.
//!
//! The current state lives in a single JSON document whose top-level keys
//! are `agents`, `tasks`, `messages` and `last_checkpoint`. Checkpoints are
//! immutable snapshots of that document next to a `{id, description,
//! timestamp, ref}` sidecar.

mod refs;
mod store;

pub use refs::{DetachedRefRecorder, GitRefRecorder, RefRecorder, CHECKPOINT_REFS_PREFIX};
pub use store::{Checkpoint, StateStore};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::agent::Agent;
use crate::core::dag::TaskGraph;
use crate::core::message::Message;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{CheckpointError, ValidationError};
use crate::exec::report::{retry_subset, ExecutionReport};

/// Sortable checkpoint identifier, also used as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new(id: impl Into<String>) -> Result<Self, CheckpointError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.ends_with(".state");
        if valid {
            Ok(Self(id))
        } else {
            Err(CheckpointError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CheckpointId {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Everything the orchestrator persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub messages: Vec<Message>,
    pub last_checkpoint: Option<CheckpointId>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.tasks.is_empty() && self.messages.is_empty()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Merge a finished run into the state.
    ///
    /// Tasks are upserted by id (existing positions kept, new tasks
    /// appended), messages appended, the agent snapshot replaced. Nothing is
    /// ever removed.
    pub fn record_run(&mut self, report: &ExecutionReport, agents: Vec<Agent>) {
        let positions: HashMap<TaskId, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        for task in &report.tasks {
            match positions.get(&task.id) {
                Some(&i) => self.tasks[i] = task.clone(),
                None => self.tasks.push(task.clone()),
            }
        }
        self.messages.extend(report.messages.iter().cloned());
        self.agents = agents;
    }

    /// Tasks that did not complete and have not been retried since.
    pub fn retryable_tasks(&self) -> Vec<&Task> {
        let superseded: HashSet<&TaskId> =
            self.tasks.iter().filter_map(|t| t.parent_id.as_ref()).collect();
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed && !superseded.contains(&t.id))
            .collect()
    }

    /// A fresh graph of retry copies for `retryable_tasks`.
    pub fn retry_graph(&self) -> Result<TaskGraph, ValidationError> {
        let tasks: Vec<Task> = self.retryable_tasks().into_iter().cloned().collect();
        retry_subset(&tasks)
    }
}
