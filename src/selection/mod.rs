//! Agent selection strategies.
//!
//! A strategy maps a task and the agents available right now to one agent.
//! Executors call it once per task immediately before dispatch.

mod capability;
mod keyword;

pub use capability::CapabilityStrategy;
pub use keyword::{KeywordRule, KeywordStrategy};

use serde::{Deserialize, Serialize};

use crate::core::agent::Agent;
use crate::core::task::Task;
use crate::error::SelectionError;

/// Picks the agent for a task from a candidate list.
///
/// Implementations must be pure: the same task and candidates always give
/// the same answer.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, task: &Task, candidates: &[Agent]) -> Result<Agent, SelectionError>;

    fn name(&self) -> &'static str;
}

/// Which strategy the configuration asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Keyword,
    Capability,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Keyword => write!(f, "keyword"),
            StrategyKind::Capability => write!(f, "capability"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "capability" => Ok(Self::Capability),
            _ => Err(format!("Invalid selection strategy: {}", s)),
        }
    }
}
