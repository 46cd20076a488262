//! Workflow templates.
//!
//! A template is an ordered list of steps with dependency edges between
//! step keys. Templates are plain data loaded from TOML, so new request
//! kinds need no code changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::DecompositionError;

const BUILTIN_TEMPLATES: &str = include_str!("builtin.toml");

/// Placeholder replaced by the request summary in step descriptions.
pub const REQUEST_PLACEHOLDER: &str = "{request}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
    /// Unique within the template; becomes the task id suffix.
    pub key: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl TemplateStep {
    pub fn render(&self, summary: &str) -> String {
        self.description.replace(REQUEST_PLACEHOLDER, summary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub kind: String,
    pub steps: Vec<TemplateStep>,
}

impl WorkflowTemplate {
    /// Check keys are unique and every `depends_on` names an earlier or
    /// later step of the same template. Cycles are caught when the graph
    /// is built.
    pub fn validate(&self) -> Result<(), DecompositionError> {
        let malformed = |reason: String| DecompositionError::MalformedTemplate {
            kind: self.kind.clone(),
            reason,
        };

        if self.kind.trim().is_empty() {
            return Err(malformed("kind is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(malformed("no steps".to_string()));
        }

        let mut keys = HashSet::new();
        for step in &self.steps {
            if step.key.trim().is_empty() {
                return Err(malformed("step with empty key".to_string()));
            }
            if step.description.trim().is_empty() {
                return Err(malformed(format!("step {} has no description", step.key)));
            }
            if !keys.insert(step.key.as_str()) {
                return Err(malformed(format!("duplicate step key {}", step.key)));
            }
        }
        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !keys.contains(d.as_str())) {
                return Err(malformed(format!(
                    "step {} depends on unknown step {}",
                    step.key, missing
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<WorkflowTemplate>,
}

/// Templates indexed by request kind (lowercase).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSet {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl TemplateSet {
    /// The feature, bugfix and refactor templates.
    pub fn builtin() -> Result<Self, DecompositionError> {
        Self::from_toml_str(BUILTIN_TEMPLATES)
    }

    /// Parse a `[[templates]]` document.
    pub fn from_toml_str(content: &str) -> Result<Self, DecompositionError> {
        let file: TemplateFile =
            toml::from_str(content).map_err(|e| DecompositionError::MalformedTemplate {
                kind: "<file>".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_templates(file.templates)
    }

    pub fn from_templates(templates: Vec<WorkflowTemplate>) -> Result<Self, DecompositionError> {
        let mut set = Self::default();
        for template in templates {
            set.insert(template)?;
        }
        Ok(set)
    }

    /// Add a template, replacing any existing one for the same kind.
    pub fn insert(&mut self, template: WorkflowTemplate) -> Result<(), DecompositionError> {
        template.validate()?;
        self.templates
            .insert(template.kind.trim().to_lowercase(), template);
        Ok(())
    }

    /// Overlay `other` on top of this set.
    pub fn merge(mut self, other: TemplateSet) -> Self {
        self.templates.extend(other.templates);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(&kind.trim().to_lowercase())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
