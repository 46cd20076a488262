//! Sequential executor.
//!
//! Processes tasks strictly in topological order, one at a time, on the
//! caller's task. A task whose dependency failed is marked blocked and
//! skipped; the remaining independent tasks still run.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::invoke::dispatch;
use super::ledger::RunLedger;
use super::{Dispatcher, ExecutionReport, Executor};
use crate::core::dag::TaskGraph;
use crate::core::registry::AgentRegistry;
use crate::core::task::{FailureReason, TaskStatus};
use crate::error::{ExecutionError, ValidationError};

#[derive(Debug, Clone)]
pub struct SyncExecutor {
    dispatcher: Dispatcher,
}

super::executor_builder!(SyncExecutor);

#[async_trait]
impl Executor for SyncExecutor {
    async fn execute(
        &self,
        graph: TaskGraph,
        agents: &AgentRegistry,
    ) -> Result<ExecutionReport, ExecutionError> {
        let d = &self.dispatcher;
        let order = graph.topological_order()?;
        let mut ledger = RunLedger::new(graph, agents.coordinator().clone(), d.events.clone());
        info!(tasks = order.len(), "Sequential run started");

        for id in order {
            let task = ledger.task(&id)?;
            if task.is_finished() {
                continue;
            }
            if d.cancel.is_cancelled() {
                ledger.cancel_pending()?;
                break;
            }
            if task.status != TaskStatus::Planned {
                return Err(ValidationError::InvalidTransition {
                    task: id,
                    from: task.status,
                    to: TaskStatus::Assigned,
                }
                .into());
            }
            if let Some(dependency) = ledger.graph().failed_dependency(&id) {
                ledger.skip(&id, FailureReason::Blocked { dependency })?;
                continue;
            }

            let agent = match d.acquire(&task, agents).await {
                Ok(agent) => agent,
                Err(err) => {
                    warn!(task = %id, error = %err, "No agent for task");
                    ledger.skip(
                        &id,
                        FailureReason::Unassignable {
                            message: err.to_string(),
                        },
                    )?;
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

            let invocation = dispatch(
                d.invoker.clone(),
                agent.clone(),
                started,
                d.config.task_timeout,
            );
            tokio::pin!(invocation);
            let result = tokio::select! {
                biased;
                result = &mut invocation => result,
                _ = d.cancel.cancelled() => {
                    // The running task finishes; everything after it is cancelled.
                    ledger.cancel_pending()?;
                    invocation.await
                }
            };

            agents.release(&agent.id).await;
            ledger.finish(&id, &agent.id, result)?;
        }

        Ok(ledger.into_report())
    }

    fn cancellation(&self) -> CancellationToken {
        self.dispatcher.cancel.clone()
    }
}
