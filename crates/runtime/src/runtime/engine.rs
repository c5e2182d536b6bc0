//! Execution engine: turns an approved plan into streamed events.
//!
//! The engine never loops over the ready set. One call executes at most
//! one subtask and returns, so when an agent suspends on a tool call the
//! HTTP response can complete; the client's next request re-enters the
//! engine, which finds the next ready subtask in the persisted plan. No
//! in-memory continuation survives across requests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ens_domain::config::ExecutionConfig;
use ens_domain::error::{Error, Result};
use ens_domain::event::AgentEvent;
use ens_domain::plan::PlanStatus;
use ens_sessions::UnitOfWork;

use crate::state::AppState;

use super::events::{DomainEvent, DomainEventKind};
use super::executor::{SubtaskExecutor, SubtaskOutcome};
use super::resolver::DependencyResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal per-plan engine state, held only while a plan is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    WaitingApproval,
    Resumed,
    Cancelled,
}

/// What one engine call achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// Every subtask is DONE; the plan transitioned to COMPLETED.
    PlanCompleted,
    /// One subtask ran to DONE; more remain.
    SubtaskDone,
    /// One subtask ran to FAILED; the plan survives for retry.
    SubtaskFailed,
    /// The running subtask suspended on tool calls.
    Suspended { awaiting_approval: bool },
    /// Nothing ready: running or failed subtasks must be advanced first.
    InProgress,
    /// An engine-level failure; the plan transitioned to FAILED.
    PlanFailed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecutionEngine {
    executor: SubtaskExecutor,
    states: Mutex<HashMap<String, EngineState>>,
    /// Width hint for level batching; dispatch stays sequential because
    /// streamed tool calls force the engine to yield between subtasks.
    #[allow(dead_code)]
    max_parallel_tasks: usize,
    approval_timeout: Duration,
    poll_interval: Duration,
}

impl ExecutionEngine {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            executor: SubtaskExecutor::new(),
            states: Mutex::new(HashMap::new()),
            max_parallel_tasks: config.max_parallel_tasks,
            approval_timeout: Duration::from_secs(config.approval_wait_timeout_secs),
            poll_interval: Duration::from_millis(config.approval_poll_interval_ms),
        }
    }

    /// Execute at most one subtask of the plan.
    pub async fn execute_plan(
        &self,
        state: &AppState,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
        plan_id: &str,
        session_id: &str,
    ) -> Result<EngineOutcome> {
        // 1. Load and check.
        let mut plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;
        if !matches!(plan.status, PlanStatus::Approved | PlanStatus::InProgress) {
            return Err(Error::InvalidTransition(format!(
                "plan {plan_id} cannot be executed (status: {})",
                plan.status.as_str()
            )));
        }

        self.states
            .lock()
            .entry(plan_id.to_string())
            .or_insert(EngineState::Running);

        // 2. First call transitions APPROVED -> IN_PROGRESS.
        if plan.status == PlanStatus::Approved {
            plan.start_execution()?;
            state.plans.save(&plan);
            uow.mark_plans();
            uow.commit("start_plan_execution")?;
            tracing::info!(plan_id = %plan_id, "plan execution started");
        } else {
            tracing::info!(plan_id = %plan_id, "plan execution resuming");
        }

        // 3. Pick the next ready subtask.
        let next = plan.next_subtask().map(|s| s.id.clone());

        let subtask_id = match next {
            Some(id) => id,
            None => {
                // 4. Nothing ready: complete, or report in-progress.
                let progress = plan.progress();
                if progress.done == progress.total && progress.failed == 0 {
                    plan.complete()?;
                    state.plans.save(&plan);
                    uow.mark_plans();
                    uow.commit("complete_plan")?;
                    state.conversations.discard_session_snapshots(session_id);

                    let duration = plan
                        .started_at
                        .map(|s| (chrono::Utc::now() - s).num_milliseconds() as f64 / 1000.0);
                    let _ = tx
                        .send(AgentEvent::ExecutionCompleted {
                            plan_id: plan_id.to_string(),
                            status: "completed".into(),
                            progress: progress.to_json(),
                            duration_seconds: duration,
                        })
                        .await;
                    state.bus.publish(
                        DomainEvent::new(
                            DomainEventKind::PlanCompleted,
                            session_id,
                            plan_id,
                            plan.goal.clone(),
                        )
                        .with_detail(progress.to_json()),
                    );
                    self.release(plan_id);
                    tracing::info!(plan_id = %plan_id, "plan completed");
                    return Ok(EngineOutcome::PlanCompleted);
                }

                tracing::info!(
                    plan_id = %plan_id,
                    done = progress.done,
                    failed = progress.failed,
                    running = progress.running,
                    "no ready subtask; execution advances on the next client request"
                );
                return Ok(EngineOutcome::InProgress);
            }
        };

        // 5. Announce the step.
        let progress = plan.progress();
        let description = plan
            .get_subtask(&subtask_id)
            .map(|s| s.description.clone())
            .unwrap_or_default();
        let _ = tx
            .send(AgentEvent::Status {
                content: format!("Executing subtask: {description}"),
                metadata: Some(serde_json::json!({
                    "subtask_id": subtask_id,
                    "progress": format!("{}/{}", progress.done + 1, progress.total),
                })),
            })
            .await;

        // 6-7. Delegate to the executor; never advance to another
        // subtask in the same call.
        match self
            .executor
            .execute_subtask(state, uow, tx, plan_id, &subtask_id, session_id)
            .await
        {
            Ok(SubtaskOutcome::Done) => Ok(EngineOutcome::SubtaskDone),
            Ok(SubtaskOutcome::Failed) => Ok(EngineOutcome::SubtaskFailed),
            Ok(SubtaskOutcome::Suspended { awaiting_approval }) => {
                Ok(EngineOutcome::Suspended { awaiting_approval })
            }
            Err(e) => {
                // 8. Executor-level exception: the plan fails.
                tracing::error!(plan_id = %plan_id, error = %e, "plan execution failed");
                let mut plan = state
                    .plans
                    .find_by_id(plan_id)
                    .ok_or_else(|| Error::not_found("plan", plan_id))?;
                if !plan.status.is_terminal() {
                    plan.fail(format!("subtask execution error: {e}"))?;
                    state.plans.save(&plan);
                    uow.mark_plans();
                    uow.commit("fail_plan")?;
                }
                self.release(plan_id);
                state.conversations.discard_session_snapshots(session_id);
                state.bus.publish(
                    DomainEvent::new(
                        DomainEventKind::PlanFailed,
                        session_id,
                        plan_id,
                        plan.goal.clone(),
                    )
                    .with_detail(serde_json::json!({ "error": e.to_string() })),
                );
                let _ = tx
                    .send(AgentEvent::Error {
                        error: format!("Plan execution failed: {e}"),
                        is_final: Some(true),
                        metadata: Some(serde_json::json!({ "plan_id": plan_id })),
                    })
                    .await;
                Ok(EngineOutcome::PlanFailed)
            }
        }
    }

    /// The subtask executor, for continuation and retry flows.
    pub fn executor(&self) -> &SubtaskExecutor {
        &self.executor
    }

    /// Poll the approval store until none of `pending_ids` is pending.
    ///
    /// Used by eager execution: the engine parks in WAITING_APPROVAL and
    /// resumes when the user has decided everything, or cancels on
    /// timeout recording the unresolved ids.
    pub async fn wait_for_approval_resolution(
        &self,
        state: &AppState,
        plan_id: &str,
        session_id: &str,
        pending_ids: &HashSet<String>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.approval_timeout);
        self.set_state(plan_id, EngineState::WaitingApproval);
        tracing::info!(
            plan_id = %plan_id,
            approvals = pending_ids.len(),
            "waiting for approval resolution"
        );

        let start = std::time::Instant::now();
        loop {
            let current: HashSet<String> = state
                .approvals
                .get_all_pending(session_id, None)
                .into_iter()
                .map(|a| a.request_id)
                .collect();
            let still_pending: Vec<&String> =
                pending_ids.iter().filter(|id| current.contains(*id)).collect();

            if still_pending.is_empty() {
                self.set_state(plan_id, EngineState::Resumed);
                tracing::info!(
                    plan_id = %plan_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "all approvals resolved"
                );
                return Ok(());
            }

            if start.elapsed() > timeout {
                self.set_state(plan_id, EngineState::Cancelled);
                let ids: Vec<String> = still_pending.into_iter().cloned().collect();
                return Err(Error::Timeout(format!(
                    "approvals unresolved after {}s: {}",
                    timeout.as_secs(),
                    ids.join(", ")
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Cancel a live plan. Refuses on COMPLETED.
    pub fn cancel_execution(
        &self,
        state: &AppState,
        uow: &mut UnitOfWork,
        plan_id: &str,
        reason: &str,
    ) -> Result<serde_json::Value> {
        let mut plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;
        plan.cancel(reason)?;
        state.plans.save(&plan);
        uow.mark_plans();
        uow.commit("cancel_plan")?;
        self.release(plan_id);

        state.bus.publish(
            DomainEvent::new(
                DomainEventKind::PlanCancelled,
                plan.conversation_id.clone(),
                plan_id,
                plan.goal.clone(),
            )
            .with_detail(serde_json::json!({ "reason": reason })),
        );
        tracing::info!(plan_id = %plan_id, reason = %reason, "plan cancelled");

        Ok(serde_json::json!({
            "plan_id": plan_id,
            "status": "cancelled",
            "reason": reason,
            "cancelled_at": plan.completed_at,
        }))
    }

    /// Progress report for a plan.
    pub fn execution_status(&self, state: &AppState, plan_id: &str) -> Result<serde_json::Value> {
        let plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;

        // Level batching honors the parallelism knob for reporting even
        // though dispatch is sequential.
        let levels = DependencyResolver::execution_levels(&plan)
            .map(|levels| {
                levels
                    .iter()
                    .flat_map(|level| {
                        level
                            .chunks(self.max_parallel_tasks.max(1))
                            .map(|batch| {
                                batch.iter().map(|s| s.id.clone()).collect::<Vec<_>>()
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(serde_json::json!({
            "plan_id": plan.id,
            "status": plan.status.as_str(),
            "progress": plan.progress().to_json(),
            "current_subtask_id": plan.current_subtask_id,
            "batches": levels,
            "started_at": plan.started_at,
            "completed_at": plan.completed_at,
        }))
    }

    pub fn engine_state(&self, plan_id: &str) -> Option<EngineState> {
        self.states.lock().get(plan_id).copied()
    }

    fn set_state(&self, plan_id: &str, state: EngineState) {
        self.states.lock().insert(plan_id.to_string(), state);
    }

    fn release(&self, plan_id: &str) {
        self.states.lock().remove(plan_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
