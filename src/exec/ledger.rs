//! Bookkeeping shared by both executors.
//!
//! The ledger owns the graph for the duration of a run. Every transition
//! goes through it so the graph, the trace, the message log and the event
//! stream stay in step.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::invoke::TaskOutcome;
use super::report::{ExecutionEvent, ExecutionReport, TraceEntry};
use crate::core::agent::{Agent, AgentId};
use crate::core::dag::TaskGraph;
use crate::core::message::Message;
use crate::core::task::{FailureReason, Task, TaskId, TaskStatus};
use crate::error::{ExecutionError, ValidationError};

pub(crate) struct RunLedger {
    graph: TaskGraph,
    coordinator: AgentId,
    messages: Vec<Message>,
    trace: Vec<TraceEntry>,
    events: Option<UnboundedSender<ExecutionEvent>>,
    started_at: DateTime<Utc>,
}

impl RunLedger {
    pub fn new(
        graph: TaskGraph,
        coordinator: AgentId,
        events: Option<UnboundedSender<ExecutionEvent>>,
    ) -> Self {
        Self {
            graph,
            coordinator,
            messages: Vec::new(),
            trace: Vec::new(),
            events,
            started_at: Utc::now(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn task(&self, id: &TaskId) -> Result<Task, ValidationError> {
        self.graph
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownTask(id.clone()))
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    fn record(&mut self, task: Task) -> Result<(), ValidationError> {
        let entry = TraceEntry {
            task_id: task.id.clone(),
            status: task.status,
            agent: task.assigned_agent.clone(),
            at: Utc::now(),
        };
        self.graph.replace(task)?;
        self.trace.push(entry);
        Ok(())
    }

    /// Planned -> Assigned.
    pub fn assign(&mut self, id: &TaskId, agent: &Agent) -> Result<(), ExecutionError> {
        let task = self.task(id)?.assign(agent.id.clone())?;
        self.record(task)?;
        debug!(task = %id, agent = %agent.id, "Task assigned");
        self.emit(ExecutionEvent::TaskAssigned {
            task_id: id.clone(),
            agent_id: agent.id.clone(),
        });
        Ok(())
    }

    /// Assigned -> InProgress, logging the dispatch message. Returns the
    /// task value to hand to the invoker.
    pub fn start(&mut self, id: &TaskId, agent: &Agent) -> Result<Task, ExecutionError> {
        let task = self.task(id)?.start()?;
        self.record(task.clone())?;
        self.messages.push(Message::dispatch(
            &self.coordinator,
            &agent.id,
            id,
            &task.description,
        ));
        info!(task = %id, agent = %agent.id, kind = %agent.kind, "Task dispatched");
        self.emit(ExecutionEvent::TaskStarted {
            task_id: id.clone(),
            agent_id: agent.id.clone(),
        });
        Ok(task)
    }

    /// Record the result of an invocation and log the completion message.
    ///
    /// Returns true when the task completed.
    pub fn finish(
        &mut self,
        id: &TaskId,
        worker: &AgentId,
        result: Result<TaskOutcome, FailureReason>,
    ) -> Result<bool, ExecutionError> {
        let current = self.task(id)?;
        match result {
            Ok(outcome) => {
                self.record(current.complete()?)?;
                self.messages
                    .push(Message::completion(worker, &self.coordinator, id, outcome.output));
                info!(task = %id, agent = %worker, "Task completed");
                self.emit(ExecutionEvent::TaskCompleted { task_id: id.clone() });
                Ok(true)
            }
            Err(reason) => {
                self.messages.push(Message::completion(
                    worker,
                    &self.coordinator,
                    id,
                    reason.to_string(),
                ));
                warn!(task = %id, agent = %worker, %reason, "Task failed");
                self.fail(current, reason)?;
                Ok(false)
            }
        }
    }

    fn fail(&mut self, task: Task, reason: FailureReason) -> Result<(), ExecutionError> {
        let id = task.id.clone();
        self.record(task.fail(reason.clone())?)?;
        self.emit(ExecutionEvent::TaskFailed {
            task_id: id,
            reason,
        });
        Ok(())
    }

    /// Fail a task that was never dispatched.
    pub fn skip(&mut self, id: &TaskId, reason: FailureReason) -> Result<(), ExecutionError> {
        let task = self.task(id)?;
        debug!(task = %id, %reason, "Task skipped");
        self.fail(task, reason)
    }

    /// Mark every Planned task downstream of `failed` as blocked.
    ///
    /// Returns how many tasks were blocked.
    pub fn block_dependents(&mut self, failed: &TaskId) -> Result<usize, ExecutionError> {
        let mut blocked = 0;
        let mut queue = VecDeque::from([failed.clone()]);
        while let Some(current) = queue.pop_front() {
            let dependents: Vec<TaskId> = self
                .graph
                .dependents_of(&current)
                .into_iter()
                .filter(|t| t.status == TaskStatus::Planned)
                .map(|t| t.id.clone())
                .collect();
            for dependent in dependents {
                self.skip(
                    &dependent,
                    FailureReason::Blocked {
                        dependency: current.clone(),
                    },
                )?;
                blocked += 1;
                queue.push_back(dependent);
            }
        }
        Ok(blocked)
    }

    /// Fail every task that has not been dispatched yet. In-flight tasks
    /// are left alone so their outcome can still be recorded.
    pub fn cancel_pending(&mut self) -> Result<usize, ExecutionError> {
        let pending: Vec<TaskId> = self
            .graph
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Planned | TaskStatus::Assigned))
            .map(|t| t.id.clone())
            .collect();
        for id in &pending {
            self.skip(id, FailureReason::Cancelled)?;
        }
        if !pending.is_empty() {
            info!(cancelled = pending.len(), "Pending tasks cancelled");
        }
        Ok(pending.len())
    }

    pub fn into_report(self) -> ExecutionReport {
        let completed = self.graph.count_status(TaskStatus::Completed);
        let failed = self.graph.count_status(TaskStatus::Failed);
        info!(completed, failed, "Run finished");
        self.emit(ExecutionEvent::RunFinished { completed, failed });
        ExecutionReport {
            tasks: self.graph.into_tasks(),
            messages: self.messages,
            trace: self.trace,
            started_at: self.started_at,
            finished_at: Utc::now(),
            checkpoint: None,
        }
    }
}
