//! Wires decomposition, execution and persistence together.

use tokio::sync::Mutex;
use tracing::info;

use crate::core::dag::TaskGraph;
use crate::core::registry::AgentRegistry;
use crate::decompose::{Request, TaskDecomposer};
use crate::exec::{ExecutionReport, Executor, RunStatus};
use crate::state::StateStore;
use crate::{Error, Result};

/// Runs requests end to end: decompose, execute, persist, checkpoint.
///
/// Generic over the executor so the sequential and concurrent engines are
/// interchangeable without changing any caller.
#[derive(Debug)]
pub struct Orchestrator<E: Executor> {
    decomposer: TaskDecomposer,
    executor: E,
    registry: AgentRegistry,
    store: StateStore,
    // Serializes load, merge and save of finished runs.
    persist: Mutex<()>,
}

impl<E: Executor> Orchestrator<E> {
    pub fn new(
        decomposer: TaskDecomposer,
        executor: E,
        registry: AgentRegistry,
        store: StateStore,
    ) -> Self {
        Self {
            decomposer,
            executor,
            registry,
            store,
            persist: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Cooperatively cancel the current run. Planned tasks fail as
    /// cancelled; in-flight tasks finish and are recorded.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.executor.cancellation().cancel();
    }

    pub async fn run(&self, request: &Request) -> Result<ExecutionReport> {
        let graph = self.decomposer.decompose(request)?;
        info!(
            request = %request.id,
            kind = %request.kind,
            tasks = graph.len(),
            "Running request"
        );
        let description = format!("{} {}: {}", request.kind, request.id, request.summary);
        self.execute(graph, &description).await
    }

    /// Run `request` and classify the result instead of returning an error.
    pub async fn run_outcome(&self, request: &Request) -> RunOutcome {
        RunOutcome::from_result(self.run(request).await)
    }

    /// Re-run the tasks of `report` that did not complete.
    pub async fn retry(&self, report: &ExecutionReport) -> Result<ExecutionReport> {
        let graph = report.retry_graph()?;
        info!(tasks = graph.len(), "Retrying failed tasks");
        self.execute(graph, "retry of failed tasks").await
    }

    /// Re-run every persisted task that did not complete and has not been
    /// retried yet.
    pub async fn retry_persisted(&self) -> Result<ExecutionReport> {
        let graph = self.store.load().await?.retry_graph()?;
        info!(tasks = graph.len(), "Retrying failed tasks from state");
        self.execute(graph, "retry of failed tasks").await
    }

    async fn execute(&self, graph: TaskGraph, description: &str) -> Result<ExecutionReport> {
        let mut report = self.executor.execute(graph, &self.registry).await?;

        let _guard = self.persist.lock().await;
        let mut state = self.store.load().await?;
        state.record_run(&report, self.registry.snapshot().await);
        self.store.save(&state).await?;
        let checkpoint = self.store.checkpoint(description).await?;

        info!(
            status = %report.status(),
            completed = report.completed_count(),
            failed = report.failed_count(),
            blocked = report.blocked_count(),
            cancelled = report.cancelled_count(),
            checkpoint = %checkpoint,
            "Run persisted"
        );
        report.checkpoint = Some(checkpoint);
        Ok(report)
    }
}

/// How a run ended, from the caller's point of view.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ExecutionReport),
    /// Some tasks failed, were blocked or were cancelled. The report's
    /// `retry_graph` re-runs just those.
    Partial(ExecutionReport),
    /// A structural failure stopped the run before a report existed.
    Aborted(Error),
}

impl RunOutcome {
    pub fn from_result(result: Result<ExecutionReport>) -> Self {
        match result {
            Ok(report) => match report.status() {
                RunStatus::FullyCompleted => RunOutcome::Completed(report),
                RunStatus::PartiallyCompleted { .. } => RunOutcome::Partial(report),
            },
            Err(err) => RunOutcome::Aborted(err),
        }
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            RunOutcome::Completed(report) | RunOutcome::Partial(report) => Some(report),
            RunOutcome::Aborted(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed(report) | RunOutcome::Partial(report) => {
                write!(f, "{}", report.status())
            }
            RunOutcome::Aborted(err) => write!(f, "aborted: {}", err),
        }
    }
}
