//! Task execution.
//!
//! Two executors run a task graph behind one `Executor` trait:
//! `SyncExecutor` walks the topological order one task at a time and
//! `AsyncExecutor` dispatches the ready set onto a bounded pool. Both
//! select an agent at dispatch time, record a message per dispatch and per
//! completion, and keep going past individual task failures.

mod concurrent;
pub mod invoke;
mod ledger;
pub mod report;
mod sequential;

pub use concurrent::AsyncExecutor;
pub use invoke::{AgentInvoker, CommandInvoker, FnInvoker, TaskOutcome};
pub use report::{ExecutionEvent, ExecutionReport, RunStatus, TraceEntry};
pub use sequential::SyncExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::agent::Agent;
use crate::core::dag::TaskGraph;
use crate::core::registry::AgentRegistry;
use crate::core::task::Task;
use crate::error::{ExecutionError, SelectionError};
use crate::selection::SelectionStrategy;

/// Default per-dispatch timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs a task graph to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute every task in `graph`, selecting agents from `agents`.
    ///
    /// Individual task failures are recorded in the report. An `Err` means
    /// the run itself could not proceed.
    async fn execute(
        &self,
        graph: TaskGraph,
        agents: &AgentRegistry,
    ) -> Result<ExecutionReport, ExecutionError>;

    /// Token that cancels runs of this executor when triggered.
    fn cancellation(&self) -> CancellationToken;
}

/// Which executor the configuration asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Concurrent,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "sync" => Ok(Self::Sequential),
            "concurrent" | "async" => Ok(Self::Concurrent),
            _ => Err(format!("Invalid execution mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Pool size for the async executor. `None` means one slot per worker
    /// agent.
    pub concurrency: Option<usize>,
    pub task_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

/// Collaborators shared by both executors.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    strategy: Arc<dyn SelectionStrategy>,
    invoker: Arc<dyn AgentInvoker>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    events: Option<UnboundedSender<ExecutionEvent>>,
}

impl Dispatcher {
    fn new(strategy: Arc<dyn SelectionStrategy>, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            strategy,
            invoker,
            config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Select an idle agent for `task` and mark it busy.
    ///
    /// Another run may grab the chosen agent between selection and the
    /// compare-and-swap; selection is then retried on the fresh candidate
    /// list.
    async fn acquire(&self, task: &Task, agents: &AgentRegistry) -> Result<Agent, SelectionError> {
        loop {
            let candidates = agents.available().await;
            let chosen = self.strategy.select(task, &candidates)?;
            if let Some(agent) = agents.try_acquire(&chosen.id).await {
                debug!(
                    task = %task.id,
                    agent = %agent.id,
                    strategy = self.strategy.name(),
                    "Agent selected"
                );
                return Ok(agent);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("strategy", &self.strategy.name())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Builder methods shared by `SyncExecutor` and `AsyncExecutor`.
macro_rules! executor_builder {
    ($ty:ty) => {
        impl $ty {
            pub fn new(
                strategy: std::sync::Arc<dyn crate::selection::SelectionStrategy>,
                invoker: std::sync::Arc<dyn crate::exec::AgentInvoker>,
            ) -> Self {
                Self {
                    dispatcher: crate::exec::Dispatcher::new(strategy, invoker),
                }
            }

            pub fn with_config(mut self, config: crate::exec::ExecutorConfig) -> Self {
                self.dispatcher.config = config;
                self
            }

            /// Publish progress events on `events`.
            pub fn with_events(
                mut self,
                events: tokio::sync::mpsc::UnboundedSender<crate::exec::ExecutionEvent>,
            ) -> Self {
                self.dispatcher.events = Some(events);
                self
            }

            /// Share a cancellation token with the caller.
            pub fn with_cancellation(mut self, token: tokio_util::sync::CancellationToken) -> Self {
                self.dispatcher.cancel = token;
                self
            }

            pub fn config(&self) -> &crate::exec::ExecutorConfig {
                &self.dispatcher.config
            }
        }
    };
}

pub(crate) use executor_builder;
