use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::agent::{Agent, AgentKind};
use crate::core::registry::AgentRegistry;
use crate::decompose::{TaskDecomposer, TemplateSet, WorkflowTemplate};
use crate::error::{DecompositionError, ValidationError};
use crate::exec::{ExecutionMode, ExecutorConfig, DEFAULT_TASK_TIMEOUT};
use crate::selection::{
    CapabilityStrategy, KeywordRule, KeywordStrategy, SelectionStrategy, StrategyKind,
};
use crate::{Error, Result};

/// One `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub kind: AgentKind,
    /// Defaults to the kind's built-in capabilities when omitted.
    pub capabilities: Option<Vec<String>>,
}

impl AgentConfig {
    pub fn to_agent(&self) -> std::result::Result<Agent, ValidationError> {
        let agent = Agent::new(self.id.clone(), self.kind)?;
        Ok(match &self.capabilities {
            Some(tags) => agent.with_capabilities(tags),
            None => agent.with_capabilities(self.kind.default_capabilities()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub state_dir: Option<String>,
    pub mode: Option<ExecutionMode>,
    pub concurrency: Option<usize>,
    pub task_timeout_secs: Option<u64>,
    pub strategy: Option<StrategyKind>,
    pub default_kind: Option<AgentKind>,
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyword_rules: Vec<KeywordRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<WorkflowTemplate>,
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::conductor_dir()?.join("state")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn effective_mode(&self) -> ExecutionMode {
        self.mode.unwrap_or_default()
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.concurrency.filter(|n| *n > 0),
            task_timeout: self
                .task_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TASK_TIMEOUT),
        }
    }

    /// Configured agents, or one default worker per kind.
    pub fn registry(&self) -> std::result::Result<AgentRegistry, ValidationError> {
        if self.agents.is_empty() {
            return AgentRegistry::with_default_agents();
        }
        let agents = self
            .agents
            .iter()
            .map(AgentConfig::to_agent)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        AgentRegistry::new(agents)
    }

    pub fn selection_strategy(
        &self,
    ) -> std::result::Result<Arc<dyn SelectionStrategy>, ValidationError> {
        match self.strategy.unwrap_or_default() {
            StrategyKind::Capability => Ok(Arc::new(CapabilityStrategy::new())),
            StrategyKind::Keyword => {
                let rules = if self.keyword_rules.is_empty() {
                    KeywordRule::defaults()
                } else {
                    self.keyword_rules.clone()
                };
                let default_kind = self.default_kind.unwrap_or(AgentKind::Architect);
                Ok(Arc::new(KeywordStrategy::new(rules, default_kind)?))
            }
        }
    }

    /// Built-in templates overlaid with the configured ones.
    pub fn decomposer(&self) -> std::result::Result<TaskDecomposer, DecompositionError> {
        let custom = TemplateSet::from_templates(self.templates.clone())?;
        Ok(TaskDecomposer::new(TemplateSet::builtin()?.merge(custom)))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            mode = ?config.mode,
            strategy = ?config.strategy,
            agents = config.agents.len(),
            templates = config.templates.len(),
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let state_dir = self.state_dir()?;
        if !state_dir.exists() {
            debug!(path = %state_dir.display(), "Creating state directory");
            fs::create_dir_all(&state_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
