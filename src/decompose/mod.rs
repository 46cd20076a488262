//! Request decomposition.
//!
//! Expands a coarse request ("feature", "bugfix", "refactor", or any kind
//! with a configured template) into a validated task graph. The request kind
//! is supplied by the caller; nothing here infers it from the text.

pub mod template;

pub use template::{TemplateSet, TemplateStep, WorkflowTemplate};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::dag::TaskGraph;
use crate::core::task::{Task, TaskId};
use crate::error::DecompositionError;

/// A development request to decompose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Prefix for the generated task ids.
    pub id: String,
    pub kind: String,
    pub summary: String,
}

impl Request {
    pub const FEATURE: &'static str = "feature";
    pub const BUGFIX: &'static str = "bugfix";
    pub const REFACTOR: &'static str = "refactor";

    /// Create a request with a fresh short id.
    pub fn new(kind: impl Into<String>, summary: impl Into<String>) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self::with_id(&uuid[..8], kind, summary)
    }

    pub fn with_id(
        id: impl Into<String>,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            summary: summary.into(),
        }
    }

    pub fn feature(summary: impl Into<String>) -> Self {
        Self::new(Self::FEATURE, summary)
    }

    pub fn bugfix(summary: impl Into<String>) -> Self {
        Self::new(Self::BUGFIX, summary)
    }

    pub fn refactor(summary: impl Into<String>) -> Self {
        Self::new(Self::REFACTOR, summary)
    }

    /// Id of the task generated for a template step.
    pub fn task_id(&self, step_key: &str) -> Result<TaskId, DecompositionError> {
        Ok(TaskId::new(format!("{}-{}", self.id, step_key))?)
    }
}

/// Turns requests into task graphs using a template set.
#[derive(Debug, Clone)]
pub struct TaskDecomposer {
    templates: TemplateSet,
}

impl TaskDecomposer {
    pub fn new(templates: TemplateSet) -> Self {
        Self { templates }
    }

    /// Decomposer over the built-in templates.
    pub fn with_builtin() -> Result<Self, DecompositionError> {
        Ok(Self::new(TemplateSet::builtin()?))
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Expand `request` into a graph of Planned tasks.
    pub fn decompose(&self, request: &Request) -> Result<TaskGraph, DecompositionError> {
        if request.id.trim().is_empty() {
            return Err(DecompositionError::MalformedRequest("request id is empty".to_string()));
        }
        let summary = request.summary.trim();
        if summary.is_empty() {
            return Err(DecompositionError::MalformedRequest("summary is empty".to_string()));
        }
        let template = self
            .templates
            .get(&request.kind)
            .ok_or_else(|| DecompositionError::UnknownKind(request.kind.clone()))?;

        let tasks = template
            .steps
            .iter()
            .map(|step| {
                let deps = step
                    .depends_on
                    .iter()
                    .map(|key| request.task_id(key))
                    .collect::<Result<Vec<_>, _>>()?;
                let id = request.task_id(&step.key)?;
                let task = Task::new(id.as_str(), &step.render(summary))?
                    .with_dependencies(deps)?
                    .with_capabilities(&step.capabilities);
                Ok::<_, DecompositionError>(task)
            })
            .collect::<Result<Vec<_>, DecompositionError>>()?;

        let graph = TaskGraph::from_tasks(tasks)?;
        debug!(
            request = %request.id,
            kind = %request.kind,
            tasks = graph.len(),
            "Decomposed request"
        );
        Ok(graph)
    }
}
