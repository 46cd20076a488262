//! Agent value type.
//!
//! Agents are capability-tagged worker identities. Their actual work happens
//! in an external host; here they are plain immutable values. A status change
//! produces a new `Agent`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationError;

/// Unique identifier for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create an agent id, rejecting empty or whitespace-only strings.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyId("agent"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Architect,
    Backend,
    Qa,
    Integration,
    Orchestrator,
}

impl AgentKind {
    /// All kinds, in declaration order.
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Architect,
        AgentKind::Backend,
        AgentKind::Qa,
        AgentKind::Integration,
        AgentKind::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Architect => "architect",
            AgentKind::Backend => "backend",
            AgentKind::Qa => "qa",
            AgentKind::Integration => "integration",
            AgentKind::Orchestrator => "orchestrator",
        }
    }

    /// Whether agents of this kind take task assignments.
    pub fn is_worker(&self) -> bool {
        !matches!(self, AgentKind::Orchestrator)
    }

    /// Capability tags given to agents of this kind when none are
    /// configured. They cover the tags used by the built-in templates.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Architect => &["design", "docs"],
            AgentKind::Backend => &["code", "debugging"],
            AgentKind::Qa => &["testing", "debugging"],
            AgentKind::Integration => &["deploy", "integration"],
            AgentKind::Orchestrator => &[],
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "architect" => Ok(Self::Architect),
            "backend" => Ok(Self::Backend),
            "qa" => Ok(Self::Qa),
            "integration" => Ok(Self::Integration),
            "orchestrator" => Ok(Self::Orchestrator),
            _ => Err(format!("Invalid agent kind: {}", s)),
        }
    }
}

/// Whether an agent is free to take a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
        }
    }
}

/// A worker identity with capability tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: AgentKind,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    /// Create an idle agent with no capabilities.
    pub fn new(id: impl Into<String>, kind: AgentKind) -> Result<Self, ValidationError> {
        Ok(Self {
            id: AgentId::new(id)?,
            kind,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
        })
    }

    /// Return a copy with the given capability tags added.
    ///
    /// Tags are lowercased and trimmed; empty tags are dropped.
    pub fn with_capabilities<I, S>(&self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.capabilities.extend(
            capabilities
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty()),
        );
        next
    }

    /// Return a copy with a new status.
    pub fn with_status(&self, status: AgentStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
