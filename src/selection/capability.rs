//! Capability-overlap selection.

use super::SelectionStrategy;
use crate::core::agent::Agent;
use crate::core::task::Task;
use crate::error::SelectionError;

/// Picks the candidate sharing the most capability tags with the task.
///
/// Ties go to the earlier candidate. A task that requires capabilities no
/// candidate has is unassignable; a task requiring none takes the first
/// candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityStrategy;

impl CapabilityStrategy {
    pub fn new() -> Self {
        Self
    }

    fn overlap(task: &Task, agent: &Agent) -> usize {
        task.required_capabilities
            .intersection(&agent.capabilities)
            .count()
    }
}

impl SelectionStrategy for CapabilityStrategy {
    fn select(&self, task: &Task, candidates: &[Agent]) -> Result<Agent, SelectionError> {
        let first = candidates.first().ok_or(SelectionError::NoCandidates)?;
        if task.required_capabilities.is_empty() {
            return Ok(first.clone());
        }

        let mut best: Option<(&Agent, usize)> = None;
        for agent in candidates {
            let score = Self::overlap(task, agent);
            // Strictly greater keeps the earliest candidate on ties.
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((agent, score));
            }
        }

        match best {
            Some((agent, score)) if score > 0 => Ok(agent.clone()),
            _ => Err(SelectionError::NoCapableAgent(task.id.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "capability"
    }
}
