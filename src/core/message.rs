//! Handoff records between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::agent::AgentId;
use crate::core::task::TaskId;

/// One inter-agent handoff. Written once and appended to the run's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub task_id: TaskId,
    /// Opaque to the engine.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(from: AgentId, to: AgentId, task_id: TaskId, payload: impl Into<String>) -> Self {
        Self {
            from_agent: from,
            to_agent: to,
            task_id,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// Coordinator hands a task to its worker. The payload is the task
    /// description.
    pub fn dispatch(
        coordinator: &AgentId,
        worker: &AgentId,
        task_id: &TaskId,
        description: &str,
    ) -> Self {
        Self::new(coordinator.clone(), worker.clone(), task_id.clone(), description)
    }

    /// Worker hands the outcome back to the coordinator.
    pub fn completion(
        worker: &AgentId,
        coordinator: &AgentId,
        task_id: &TaskId,
        outcome: impl Into<String>,
    ) -> Self {
        Self::new(worker.clone(), coordinator.clone(), task_id.clone(), outcome)
    }
}
