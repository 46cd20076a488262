//! Concurrent executor.
//!
//! Keeps a ready set of Planned tasks whose dependencies are all Completed
//! and dispatches them onto a bounded `JoinSet`. Each completion re-evaluates
//! the ready set. A failure blocks every Planned task downstream of it. The
//! run ends when no task is left Planned, Assigned or InProgress.

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::invoke::{dispatch, TaskOutcome};
use super::ledger::RunLedger;
use super::{Dispatcher, ExecutionReport, Executor};
use crate::core::agent::AgentId;
use crate::core::dag::TaskGraph;
use crate::core::registry::AgentRegistry;
use crate::core::task::{FailureReason, TaskId, TaskStatus};
use crate::error::ExecutionError;

type Finished = (TaskId, AgentId, Result<TaskOutcome, FailureReason>);

#[derive(Debug, Clone)]
pub struct AsyncExecutor {
    dispatcher: Dispatcher,
}

super::executor_builder!(AsyncExecutor);

impl AsyncExecutor {
    /// Dispatch as many ready tasks as the pool allows.
    ///
    /// Returns whether any task changed state. A task no agent can take is
    /// left Planned while other tasks are in flight (an agent may free up);
    /// with nothing in flight it fails as unassignable.
    async fn dispatch_ready(
        &self,
        ledger: &mut RunLedger,
        agents: &AgentRegistry,
        running: &mut JoinSet<Finished>,
        limit: usize,
    ) -> Result<bool, ExecutionError> {
        let d = &self.dispatcher;
        let mut progressed = false;
        let ready: Vec<TaskId> = ledger.graph().ready().iter().map(|t| t.id.clone()).collect();

        for id in ready {
            if running.len() >= limit {
                break;
            }
            let task = ledger.task(&id)?;
            let agent = match d.acquire(&task, agents).await {
                Ok(agent) => agent,
                Err(err) if !running.is_empty() => {
                    debug!(task = %id, error = %err, "Deferring task until an agent frees up");
                    continue;
                }
                Err(err) => {
                    warn!(task = %id, error = %err, "No agent for task");
                    ledger.skip(
                        &id,
                        FailureReason::Unassignable {
                            message: err.to_string(),
                        },
                    )?;
                    ledger.block_dependents(&id)?;
                    progressed = true;
                    continue;
                }
            };

            ledger.assign(&id, &agent)?;
            let started = match ledger.start(&id, &agent) {
                Ok(task) => task,
                Err(err) => {
                    agents.release(&agent.id).await;
                    return Err(err);
                }
            };

            let invoker = d.invoker.clone();
            let timeout = d.config.task_timeout;
            running.spawn(async move {
                let worker = agent.id.clone();
                let result = dispatch(invoker, agent, started, timeout).await;
                (id, worker, result)
            });
            progressed = true;
        }
        Ok(progressed)
    }
}

#[async_trait]
impl Executor for AsyncExecutor {
    async fn execute(
        &self,
        graph: TaskGraph,
        agents: &AgentRegistry,
    ) -> Result<ExecutionReport, ExecutionError> {
        let d = &self.dispatcher;
        graph.validate()?;
        let limit = match d.config.concurrency {
            Some(n) => n,
            None => agents.worker_count().await,
        }
        .max(1);

        let mut ledger = RunLedger::new(graph, agents.coordinator().clone(), d.events.clone());
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut cancelled = false;
        info!(tasks = ledger.graph().len(), limit, "Concurrent run started");

        // Tasks that arrive already Failed never complete, so their dependents
        // would otherwise never become ready.
        let failed: Vec<TaskId> = ledger
            .graph()
            .tasks()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect();
        for id in &failed {
            ledger.block_dependents(id)?;
        }

        loop {
            if !cancelled && d.cancel.is_cancelled() {
                cancelled = true;
                ledger.cancel_pending()?;
            }

            let progressed = if cancelled {
                false
            } else {
                self.dispatch_ready(&mut ledger, agents, &mut running, limit)
                    .await?
            };

            if running.is_empty() {
                if ledger.graph().is_finished() {
                    break;
                }
                if progressed {
                    continue;
                }
                return Err(ExecutionError::Deadlock {
                    pending: ledger.graph().unfinished(),
                });
            }

            tokio::select! {
                biased;
                joined = running.join_next() => {
                    match joined {
                        Some(Ok((id, worker, result))) => {
                            agents.release(&worker).await;
                            if !ledger.finish(&id, &worker, result)? && !cancelled {
                                ledger.block_dependents(&id)?;
                            }
                        }
                        Some(Err(err)) => {
                            return Err(ExecutionError::TaskJoin(err.to_string()));
                        }
                        None => {}
                    }
                }
                _ = d.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    ledger.cancel_pending()?;
                }
            }
        }

        Ok(ledger.into_report())
    }

    fn cancellation(&self) -> CancellationToken {
        self.dispatcher.cancel.clone()
    }
}
