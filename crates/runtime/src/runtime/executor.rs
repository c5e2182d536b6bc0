//! Subtask execution.
//!
//! One subtask at a time: mark it RUNNING, isolate the conversation
//! behind a snapshot seeded with dependency results, stream the assigned
//! agent, classify the outcome, then restore the snapshot keeping only
//! the subtask's final answer. A subtask whose agent emitted tool calls
//! stays RUNNING with its stream suspended; the tool-result continuation
//! finishes it on a later request via [`SubtaskExecutor::finish_running_subtask`].

use tokio::sync::mpsc;

use ens_domain::error::{Error, Result};
use ens_domain::event::AgentEvent;
use ens_domain::plan::{ExecutionPlan, Subtask, SubtaskStatus};
use ens_sessions::store::DependencyResult;
use ens_sessions::UnitOfWork;

use crate::agents::{AgentInvocation, TurnOutcome};
use crate::state::AppState;

use super::events::{DomainEvent, DomainEventKind};

/// Error text cap recorded on a failed subtask.
const MAX_ERROR_LEN: usize = 500;

/// How a subtask execution step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtaskOutcome {
    Done,
    Failed,
    Suspended { awaiting_approval: bool },
}

pub struct SubtaskExecutor;

impl SubtaskExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one PENDING subtask, forwarding every agent event.
    pub async fn execute_subtask(
        &self,
        state: &AppState,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
        plan_id: &str,
        subtask_id: &str,
        session_id: &str,
    ) -> Result<SubtaskOutcome> {
        // Pre-flight failures raise: the engine fails the whole plan on
        // them (a missing plan or a status race is not an agent problem).
        let mut plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;
        let subtask = plan
            .get_subtask(subtask_id)
            .ok_or_else(|| Error::not_found("subtask", subtask_id))?
            .clone();
        if subtask.status != SubtaskStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "subtask {subtask_id} is not pending (current: {})",
                subtask.status.as_str()
            )));
        }
        // Registry lookup is pre-flight too: a subtask assigned to an
        // unregistered agent is a plan defect, not a runtime hiccup.
        let agent = state.registry.get(subtask.agent)?;

        // ── Start + isolate ─────────────────────────────────────────
        let dependency_results = collect_dependency_results(&plan, &subtask);
        let snapshot_id = state.conversations.create_subtask_snapshot(
            session_id,
            subtask_id,
            &dependency_results,
        )?;
        uow.mark_conversation(session_id);

        {
            let st = plan
                .get_subtask_mut(subtask_id)
                .ok_or_else(|| Error::not_found("subtask", subtask_id))?;
            st.start()?;
            st.metadata
                .insert("snapshot_id".into(), serde_json::json!(snapshot_id));
        }
        plan.current_subtask_id = Some(subtask_id.to_string());
        state.plans.save(&plan);
        uow.mark_plans();
        uow.commit("start_subtask")?;

        state.bus.publish(
            DomainEvent::new(
                DomainEventKind::SubtaskStarted,
                session_id,
                subtask_id,
                subtask.agent.as_str(),
            )
            .with_detail(serde_json::json!({ "plan_id": plan_id })),
        );

        let context = serde_json::json!({
            "subtask_id": subtask_id,
            "plan_id": plan_id,
            "plan_goal": plan.goal,
            "dependencies": dependency_results
                .iter()
                .map(|d| serde_json::json!({
                    "id": d.subtask_id,
                    "description": d.description,
                    "result": d.result,
                    "agent": d.agent,
                }))
                .collect::<Vec<_>>(),
            "execution_mode": "subtask",
        });

        // ── Run the agent ───────────────────────────────────────────
        tracing::info!(
            subtask_id = %subtask_id,
            agent = %subtask.agent,
            "routing subtask to agent"
        );
        let outcome = agent
            .process(
                AgentInvocation {
                    session_id,
                    message: Some(&subtask.description),
                    context,
                },
                uow,
                tx,
            )
            .await;

        match outcome {
            Ok(TurnOutcome::Suspended { awaiting_approval }) => {
                // Subtask stays RUNNING; the snapshot is restored when
                // the continuation finishes it.
                Ok(SubtaskOutcome::Suspended { awaiting_approval })
            }
            Ok(TurnOutcome::Final(content)) => {
                self.finish_running_subtask(state, uow, tx, plan_id, subtask_id, session_id, Ok(content))
                    .await
            }
            Ok(TurnOutcome::Failed(error)) => {
                self.finish_running_subtask(state, uow, tx, plan_id, subtask_id, session_id, Err(error))
                    .await
            }
            Err(e) => {
                // Agent-level exception: the subtask fails, the plan
                // survives. No re-raise.
                tracing::error!(subtask_id = %subtask_id, error = %e, "subtask agent errored");
                self.finish_running_subtask(
                    state,
                    uow,
                    tx,
                    plan_id,
                    subtask_id,
                    session_id,
                    Err(e.to_string()),
                )
                .await
            }
        }
    }

    /// Finish a RUNNING subtask with the agent's final content or error.
    ///
    /// Also the entry point for tool-result continuations: when the
    /// suspended agent eventually produces its final answer in a later
    /// request, this settles the subtask, restores the snapshot and
    /// emits the terminal subtask event.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish_running_subtask(
        &self,
        state: &AppState,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
        plan_id: &str,
        subtask_id: &str,
        session_id: &str,
        result: std::result::Result<String, String>,
    ) -> Result<SubtaskOutcome> {
        // Reload for the current status: the agent run may have taken a
        // while and the plan may have been mutated meanwhile.
        let mut plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;
        let subtask = plan
            .get_subtask(subtask_id)
            .ok_or_else(|| Error::not_found("subtask", subtask_id))?
            .clone();

        if subtask.status.is_terminal() {
            // Second settle attempt (e.g. duplicate continuation): skip
            // the status write.
            tracing::warn!(
                subtask_id = %subtask_id,
                status = subtask.status.as_str(),
                "subtask already settled, skipping status write"
            );
            return Ok(match subtask.status {
                SubtaskStatus::Done => SubtaskOutcome::Done,
                _ => SubtaskOutcome::Failed,
            });
        }

        // Content-sniffed backend errors count as failures.
        let result = match result {
            Ok(content) => match sniff_llm_error(&content) {
                Some(error) => Err(error),
                None => Ok(content),
            },
            Err(error) => Err(truncate(&error, MAX_ERROR_LEN)),
        };

        let outcome = match result {
            Ok(content) => {
                let content = if content.is_empty() {
                    "(no output)".to_string()
                } else {
                    content
                };
                {
                    let st = plan
                        .get_subtask_mut(subtask_id)
                        .ok_or_else(|| Error::not_found("subtask", subtask_id))?;
                    st.complete(&content)?;
                }
                let settled = plan
                    .get_subtask(subtask_id)
                    .ok_or_else(|| Error::not_found("subtask", subtask_id))?;

                let _ = tx
                    .send(AgentEvent::SubtaskCompleted {
                        subtask_id: subtask_id.to_string(),
                        result: content,
                        agent: settled.agent.as_str().to_string(),
                        duration_seconds: settled.duration_seconds(),
                    })
                    .await;
                state.bus.publish(
                    DomainEvent::new(
                        DomainEventKind::SubtaskCompleted,
                        session_id,
                        subtask_id,
                        settled.agent.as_str(),
                    )
                    .with_detail(serde_json::json!({ "plan_id": plan_id })),
                );
                tracing::info!(subtask_id = %subtask_id, "subtask completed");
                SubtaskOutcome::Done
            }
            Err(error) => {
                {
                    let st = plan
                        .get_subtask_mut(subtask_id)
                        .ok_or_else(|| Error::not_found("subtask", subtask_id))?;
                    st.fail(&error)?;
                }
                let _ = tx
                    .send(AgentEvent::Error {
                        error: error.clone(),
                        is_final: Some(true),
                        metadata: Some(serde_json::json!({
                            "subtask_id": subtask_id,
                            "status": "failed",
                        })),
                    })
                    .await;
                state.bus.publish(
                    DomainEvent::new(
                        DomainEventKind::SubtaskFailed,
                        session_id,
                        subtask_id,
                        subtask.agent.as_str(),
                    )
                    .with_detail(serde_json::json!({ "plan_id": plan_id, "error": error })),
                );
                tracing::error!(subtask_id = %subtask_id, "subtask failed");
                SubtaskOutcome::Failed
            }
        };

        plan.current_subtask_id = None;
        state.plans.save(&plan);
        uow.mark_plans();
        uow.commit("settle_subtask")?;

        // Restore the conversation, keeping only the subtask's final
        // answer. The subtask is already settled and persisted, so a
        // restore failure is logged and swallowed.
        if let Some(snapshot_id) = subtask
            .metadata
            .get("snapshot_id")
            .and_then(|v| v.as_str())
        {
            if let Err(e) =
                state
                    .conversations
                    .restore_from_snapshot(session_id, snapshot_id, true)
            {
                tracing::error!(
                    snapshot_id = %snapshot_id,
                    error = %e,
                    "snapshot restore failed after subtask settled"
                );
            } else {
                uow.mark_conversation(session_id);
                uow.commit("restore_snapshot")?;
            }
        }

        Ok(outcome)
    }

    /// Retry a FAILED subtask: reset to PENDING, then execute again.
    pub async fn retry_failed_subtask(
        &self,
        state: &AppState,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
        plan_id: &str,
        subtask_id: &str,
        session_id: &str,
    ) -> Result<SubtaskOutcome> {
        let mut plan = state
            .plans
            .find_by_id(plan_id)
            .ok_or_else(|| Error::not_found("plan", plan_id))?;
        {
            let subtask = plan
                .get_subtask_mut(subtask_id)
                .ok_or_else(|| Error::not_found("subtask", subtask_id))?;
            subtask.reset_for_retry()?;
        }
        state.plans.save(&plan);
        uow.mark_plans();
        uow.commit("reset_subtask_for_retry")?;

        tracing::info!(subtask_id = %subtask_id, "retrying failed subtask");
        self.execute_subtask(state, uow, tx, plan_id, subtask_id, session_id)
            .await
    }
}

impl Default for SubtaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn collect_dependency_results(plan: &ExecutionPlan, subtask: &Subtask) -> Vec<DependencyResult> {
    subtask
        .dependencies
        .iter()
        .filter_map(|dep_id| {
            let dep = plan.get_subtask(dep_id)?;
            if dep.status != SubtaskStatus::Done {
                return None;
            }
            Some(DependencyResult {
                subtask_id: dep.id.clone(),
                description: dep.description.clone(),
                result: dep.result.clone().unwrap_or_default(),
                agent: dep.agent.as_str().to_string(),
            })
        })
        .collect()
}

/// Detect backend error text smuggled into assistant content.
pub(crate) fn sniff_llm_error(content: &str) -> Option<String> {
    let markers = ["LiteLLM proxy unavailable", "No tool output found"];
    if content.trim_start().starts_with("[Error]")
        || markers.iter().any(|m| content.contains(m))
    {
        return Some(truncate(content, MAX_ERROR_LEN));
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    s[..end].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
