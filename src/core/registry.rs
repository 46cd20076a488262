//! Agent registry shared by the orchestrator and executors.
//!
//! The table is read-mostly. Status changes replace the stored `Agent` with
//! a new value under the write lock, compare-and-swap style, so readers
//! never observe a half-updated agent.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::agent::{Agent, AgentId, AgentKind, AgentStatus};
use crate::error::ValidationError;

/// Id of the coordinator added when none is configured.
pub const COORDINATOR_ID: &str = "orchestrator";

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<Vec<Agent>>>,
    coordinator: AgentId,
}

impl AgentRegistry {
    /// Build a registry, keeping registration order.
    ///
    /// The first `orchestrator`-kind agent becomes the coordinator; one is
    /// added when the list has none.
    pub fn new(agents: Vec<Agent>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.id.clone()) {
                return Err(ValidationError::DuplicateAgent(agent.id.to_string()));
            }
        }

        let mut agents = agents;
        let coordinator = match agents.iter().find(|a| a.kind == AgentKind::Orchestrator) {
            Some(agent) => agent.id.clone(),
            None => {
                let agent = Agent::new(COORDINATOR_ID, AgentKind::Orchestrator)?;
                if seen.contains(&agent.id) {
                    return Err(ValidationError::DuplicateAgent(COORDINATOR_ID.to_string()));
                }
                let id = agent.id.clone();
                agents.push(agent);
                id
            }
        };

        Ok(Self {
            agents: Arc::new(RwLock::new(agents)),
            coordinator,
        })
    }

    /// One idle worker per worker kind, named `<kind>-1`, with the kind's
    /// default capabilities.
    pub fn with_default_agents() -> Result<Self, ValidationError> {
        Self::new(Self::default_agents()?)
    }

    pub fn default_agents() -> Result<Vec<Agent>, ValidationError> {
        AgentKind::ALL
            .iter()
            .filter(|kind| kind.is_worker())
            .map(|kind| {
                Agent::new(format!("{}-1", kind), *kind)
                    .map(|a| a.with_capabilities(kind.default_capabilities()))
            })
            .collect()
    }

    /// The agent that sends dispatches and receives completions.
    pub fn coordinator(&self) -> &AgentId {
        &self.coordinator
    }

    pub async fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents.read().await.iter().find(|a| &a.id == id).cloned()
    }

    /// Every agent, coordinator included, in registration order.
    pub async fn snapshot(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    /// Worker agents regardless of status.
    pub async fn workers(&self) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.kind.is_worker())
            .cloned()
            .collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.kind.is_worker())
            .count()
    }

    /// Idle workers: the selection candidates at this moment.
    pub async fn available(&self) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.kind.is_worker() && a.is_idle())
            .cloned()
            .collect()
    }

    /// Replace the agent's status only if it currently equals `expected`.
    ///
    /// Returns the new value on success, `None` when the agent is unknown or
    /// its status differs.
    pub async fn compare_and_swap(
        &self,
        id: &AgentId,
        expected: AgentStatus,
        new: AgentStatus,
    ) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        let slot = agents.iter_mut().find(|a| &a.id == id)?;
        if slot.status != expected {
            return None;
        }
        let next = slot.with_status(new);
        *slot = next.clone();
        Some(next)
    }

    /// Idle -> Busy.
    pub async fn try_acquire(&self, id: &AgentId) -> Option<Agent> {
        self.compare_and_swap(id, AgentStatus::Idle, AgentStatus::Busy)
            .await
    }

    /// Busy -> Idle. Returns false if the agent was not busy.
    pub async fn release(&self, id: &AgentId) -> bool {
        self.compare_and_swap(id, AgentStatus::Busy, AgentStatus::Idle)
            .await
            .is_some()
    }
}
