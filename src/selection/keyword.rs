//! Keyword-based selection.
//!
//! Each rule maps an agent kind to a keyword set. Rules are tried in order
//! against the task description (case-insensitive substring match); the
//! first rule that matches names the kind. No match falls back to the
//! default kind.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::SelectionStrategy;
use crate::core::agent::{Agent, AgentKind};
use crate::core::task::Task;
use crate::error::{SelectionError, ValidationError};

/// One entry of the priority-ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub kind: AgentKind,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new<I, S>(kind: AgentKind, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// The built-in priority list. Verification words come first so that
    /// "test" and "verify" steps reach QA even when they mention code.
    pub fn defaults() -> Vec<KeywordRule> {
        vec![
            Self::new(
                AgentKind::Qa,
                ["test", "verify", "validate", "reproduce", "qa", "coverage"],
            ),
            Self::new(
                AgentKind::Architect,
                ["design", "architect", "plan", "schema", "document", "analyze"],
            ),
            Self::new(
                AgentKind::Integration,
                ["integrate", "deploy", "release", "merge", "migrate"],
            ),
            Self::new(
                AgentKind::Backend,
                ["implement", "fix", "refactor", "code", "endpoint", "build"],
            ),
        ]
    }

    fn compile(&self) -> Result<Regex, ValidationError> {
        let alternatives: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(ValidationError::InvalidRule(format!(
                "rule for {} has no keywords",
                self.kind
            )));
        }
        RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .map_err(|e| ValidationError::InvalidRule(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct KeywordStrategy {
    rules: Vec<(AgentKind, Regex)>,
    default_kind: AgentKind,
}

impl KeywordStrategy {
    pub fn new(rules: Vec<KeywordRule>, default_kind: AgentKind) -> Result<Self, ValidationError> {
        let rules = rules
            .iter()
            .map(|rule| Ok((rule.kind, rule.compile()?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;
        Ok(Self {
            rules,
            default_kind,
        })
    }

    /// Built-in rules with `architect` as the fallback kind.
    pub fn with_defaults() -> Result<Self, ValidationError> {
        Self::new(KeywordRule::defaults(), AgentKind::Architect)
    }

    /// The kind the rules choose for a description.
    pub fn classify(&self, description: &str) -> AgentKind {
        self.rules
            .iter()
            .find(|(_, pattern)| pattern.is_match(description))
            .map(|(kind, _)| *kind)
            .unwrap_or(self.default_kind)
    }

    pub fn default_kind(&self) -> AgentKind {
        self.default_kind
    }
}

impl SelectionStrategy for KeywordStrategy {
    fn select(&self, task: &Task, candidates: &[Agent]) -> Result<Agent, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        // The default kind only applies when no rule matched; a matched kind
        // with no idle agent is not rerouted.
        let kind = self.classify(&task.description);
        candidates
            .iter()
            .find(|agent| agent.kind == kind)
            .cloned()
            .ok_or(SelectionError::NoMatchingAgent(kind))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}
