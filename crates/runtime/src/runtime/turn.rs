//! Request orchestration: one inbound client frame becomes one
//! session-locked, unit-of-work-scoped streaming turn.
//!
//! Entry point: [`handle_frame`] resolves the session, spawns the
//! producer task and returns a channel of [`AgentEvent`]s for the SSE
//! layer. Every flow catches at its boundary: the client always sees a
//! defined end of stream with at most one terminal event.

use tokio::sync::mpsc;
use tracing::Instrument;

use ens_domain::agent::AgentKind;
use ens_domain::approval::ApprovalKind;
use ens_domain::error::{Error, Result};
use ens_domain::event::AgentEvent;
use ens_domain::frame::{ClientFrame, HitlDecision, PlanDecision};
use ens_domain::message::Message;
use ens_domain::plan::{PlanStatus, SubtaskStatus};
use ens_sessions::UnitOfWork;

use crate::agents::{AgentInvocation, TurnOutcome};
use crate::state::AppState;

use super::engine::EngineOutcome;
use super::events::{DomainEvent, DomainEventKind};
use super::executor::SubtaskOutcome;
use super::fsm::{FsmEvent, FsmState};
use super::resolver::DependencyResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start processing one client frame.
///
/// Returns the effective session id and the event stream. The producer
/// holds the session lock for the whole stream; for a fresh session the
/// first event is `session_info`.
pub fn handle_frame(
    state: AppState,
    requested_session: Option<String>,
    frame: ClientFrame,
) -> (String, mpsc::Receiver<AgentEvent>) {
    let (session_id, is_new) = resolve_session(requested_session);
    let (tx, rx) = mpsc::channel::<AgentEvent>(64);

    let sid = session_id.clone();
    let span = tracing::info_span!("turn", session_id = %sid, frame = frame.kind());
    tokio::spawn(
        async move {
            let _permit = state.session_locks.acquire(&sid).await;

            if is_new {
                let _ = tx
                    .send(AgentEvent::SessionInfo {
                        session_id: sid.clone(),
                    })
                    .await;
            }

            let mut uow = state.new_uow();
            match run_frame(&state, &mut uow, &tx, &sid, frame).await {
                Ok(()) => {
                    if let Err(e) = uow.finish("request_scope") {
                        tracing::error!(error = %e, "final commit failed");
                        let _ = tx.send(AgentEvent::fatal(format!("commit failed: {e}"))).await;
                    }
                }
                Err(e) => {
                    // Convention: an Err from a flow means no terminal
                    // event was emitted yet.
                    if let Err(rb) = uow.rollback() {
                        tracing::error!(error = %rb, "rollback failed");
                    }
                    tracing::warn!(error = %e, "turn ended with error");
                    let _ = tx.send(AgentEvent::fatal(e.to_string())).await;
                }
            }
        }
        .instrument(span),
    );

    (session_id, rx)
}

fn resolve_session(requested: Option<String>) -> (String, bool) {
    match requested {
        Some(id) if !id.is_empty() && !id.starts_with("new_") => (id, false),
        _ => (format!("s-{}", uuid::Uuid::new_v4()), true),
    }
}

async fn run_frame(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    frame: ClientFrame,
) -> Result<()> {
    state.bus.publish(DomainEvent::new(
        DomainEventKind::MessageReceived,
        session_id,
        session_id,
        frame.kind(),
    ));

    match frame {
        ClientFrame::UserMessage { content, .. } => {
            process_message(state, uow, tx, session_id, &content).await
        }
        ClientFrame::ToolResult {
            call_id,
            result,
            error,
        } => process_tool_result(state, uow, tx, session_id, &call_id, result, error).await,
        ClientFrame::SwitchAgent {
            agent_type,
            content,
        } => switch_agent(state, uow, tx, session_id, &agent_type, content).await,
        ClientFrame::HitlDecision {
            call_id,
            decision,
            modified_arguments,
            feedback,
        } => handle_hitl(state, uow, tx, session_id, &call_id, decision, modified_arguments, feedback)
            .await,
        ClientFrame::PlanDecision {
            approval_request_id,
            decision,
            feedback,
        } => handle_plan_decision(state, uow, tx, session_id, &approval_request_id, decision, feedback)
            .await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// user_message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process_message(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    content: &str,
) -> Result<()> {
    let (_, created) = state.conversations.get_or_create(session_id);
    if created {
        uow.mark_conversation(session_id);
    }

    // A message into an in-progress plan is a continuation trigger, not
    // a new task.
    if let Some(plan) = state
        .plans
        .find_active_by_session(session_id)
        .filter(|p| p.status == PlanStatus::InProgress)
    {
        state
            .conversations
            .append_message(session_id, Message::user(content))?;
        uow.mark_conversation(session_id);
        uow.commit("save_user_message")?;
        return continue_plan(state, uow, tx, session_id, &plan.id).await;
    }

    // ── FSM normalization ───────────────────────────────────────────
    match state.fsm.current_state(session_id) {
        FsmState::Idle => {}
        FsmState::Completed => {
            state.fsm.transition(session_id, FsmEvent::Reset, None)?;
        }
        FsmState::PlanReview => {
            let pending = state
                .approvals
                .get_all_pending(session_id, Some(ApprovalKind::Plan));
            let _ = tx
                .send(AgentEvent::fatal(format!(
                    "a plan is awaiting your decision (approval id: {})",
                    pending
                        .first()
                        .map(|a| a.request_id.as_str())
                        .unwrap_or("unknown")
                )))
                .await;
            return Ok(());
        }
        FsmState::ErrorHandling => {
            state
                .fsm
                .transition(session_id, FsmEvent::PlanCancelled, None)?;
            state.fsm.transition(session_id, FsmEvent::Reset, None)?;
        }
        other => {
            // A mid-flight state survived a crash or an abandoned stream.
            // Contexts are transient by design, so recover to IDLE.
            tracing::warn!(
                session_id = %session_id,
                state = other.as_str(),
                "recovering stale fsm state"
            );
            state.fsm.reset(session_id);
        }
    }
    state
        .fsm
        .transition(session_id, FsmEvent::ReceiveMessage, None)?;

    // ── Classify ────────────────────────────────────────────────────
    let classification = match state.classifier.classify(content).await {
        Ok(c) => c,
        Err(e) => {
            state
                .fsm
                .transition(session_id, FsmEvent::ClassifyError, None)?;
            let _ = tx
                .send(AgentEvent::fatal(format!("classification failed: {e}")))
                .await;
            return Ok(());
        }
    };
    tracing::info!(
        session_id = %session_id,
        is_atomic = classification.is_atomic,
        agent = %classification.agent,
        "message classified"
    );

    if classification.is_atomic {
        state
            .fsm
            .transition(session_id, FsmEvent::IsAtomicTrue, None)?;
        route_and_run(state, uow, tx, session_id, classification.agent, content).await
    } else {
        state
            .fsm
            .transition(session_id, FsmEvent::IsAtomicFalse, None)?;
        state
            .fsm
            .transition(session_id, FsmEvent::RouteToArchitect, None)?;
        run_planning(state, uow, tx, session_id, content, None).await
    }
}

/// Atomic path: switch to the routed agent and run one turn.
async fn route_and_run(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    kind: AgentKind,
    content: &str,
) -> Result<()> {
    let previous = state
        .conversations
        .set_active_agent(session_id, kind.as_str())?;
    uow.mark_conversation(session_id);
    if previous != kind.as_str() {
        let _ = tx
            .send(AgentEvent::AgentSwitched {
                from_agent: previous,
                to_agent: kind.as_str().to_string(),
                reason: "task routing".into(),
            })
            .await;
        state.bus.publish(DomainEvent::new(
            DomainEventKind::AgentSwitched,
            session_id,
            session_id,
            kind.as_str(),
        ));
    }

    let agent = state.registry.get(kind)?;
    let outcome = agent
        .process(
            AgentInvocation {
                session_id,
                message: Some(content),
                context: serde_json::json!({}),
            },
            uow,
            tx,
        )
        .await?;

    match outcome {
        TurnOutcome::Final(_) => fsm_complete_flow(state, session_id),
        TurnOutcome::Suspended { .. } => {
            // The stream ends here; the tool result re-enters the turn.
        }
        TurnOutcome::Failed(message) => {
            fsm_fail_flow(state, session_id);
            let _ = tx.send(AgentEvent::fatal(message)).await;
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_planning(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    goal: &str,
    feedback: Option<&str>,
) -> Result<()> {
    if let Some(feedback) = feedback {
        state
            .conversations
            .append_message(session_id, Message::user(feedback))?;
    } else {
        state
            .conversations
            .append_message(session_id, Message::user(goal))?;
    }
    uow.mark_conversation(session_id);
    uow.commit("save_user_message")?;

    let _ = tx
        .send(AgentEvent::Status {
            content: "Analyzing the task and drafting a plan".into(),
            metadata: None,
        })
        .await;

    let architect = state.registry.architect();
    let mut plan = match architect.draft_plan(session_id, goal, feedback).await {
        Ok(plan) => plan,
        Err(e) => {
            let _ = tx
                .send(AgentEvent::fatal(format!("planning failed: {e}")))
                .await;
            return Ok(());
        }
    };

    // Structural issues are computed eagerly and recorded; the approve
    // transition is the enforcement point.
    let issues = DependencyResolver::validate(&plan);
    if !issues.is_empty() {
        tracing::warn!(plan_id = %plan.id, issues = ?issues, "drafted plan has validation issues");
        plan.metadata
            .insert("validation_errors".into(), serde_json::json!(issues));
    }
    state.plans.save(&plan);
    uow.mark_plans();

    state.bus.publish(
        DomainEvent::new(
            DomainEventKind::PlanCreated,
            session_id,
            plan.id.clone(),
            plan.goal.clone(),
        )
        .with_detail(serde_json::json!({ "subtasks": plan.subtasks.len() })),
    );
    state
        .fsm
        .transition(session_id, FsmEvent::PlanCreated, None)?;

    // Gate on the plan policy; a policy that waives approval starts
    // execution immediately.
    let (requires, reason) = state.approvals.should_require_approval(
        ApprovalKind::Plan,
        &plan.goal,
        &serde_json::Value::Null,
    );
    if !requires {
        tracing::info!(plan_id = %plan.id, "plan approval waived by policy");
        let plan_id = plan.id.clone();
        return approve_plan(state, uow, tx, session_id, None, &plan_id).await;
    }

    let request_id = format!("pa-{}", uuid::Uuid::new_v4());
    state.approvals.add_pending(
        ens_domain::approval::PendingApproval::new(
            request_id.clone(),
            ApprovalKind::Plan,
            plan.goal.clone(),
            session_id,
            serde_json::json!({ "plan_id": plan.id, "summary": plan.summary() }),
            reason,
        ),
    )?;
    uow.mark_approvals();
    uow.commit("create_plan_approval")?;

    let _ = tx
        .send(AgentEvent::PlanApprovalRequired {
            approval_request_id: request_id,
            plan_id: plan.id.clone(),
            plan_summary: plan.summary(),
        })
        .await;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// plan_decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn handle_plan_decision(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    approval_request_id: &str,
    decision: PlanDecision,
    feedback: Option<String>,
) -> Result<()> {
    let approval = state
        .approvals
        .get_pending(approval_request_id)
        .ok_or_else(|| Error::not_found("approval request", approval_request_id))?;
    if approval.kind != ApprovalKind::Plan {
        return Err(Error::Validation(format!(
            "approval {approval_request_id} is not a plan approval"
        )));
    }
    let plan_id = approval
        .details
        .get("plan_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other("plan approval is missing its plan id".into()))?
        .to_string();

    match decision {
        PlanDecision::Approve => {
            approve_plan(state, uow, tx, session_id, Some(approval_request_id), &plan_id).await
        }
        PlanDecision::Reject => {
            state
                .approvals
                .reject(approval_request_id, feedback.clone())?;
            uow.mark_approvals();

            if let Some(mut plan) = state.plans.find_by_id(&plan_id) {
                if !plan.status.is_terminal() {
                    let reason = match &feedback {
                        Some(f) => format!("rejected by user: {f}"),
                        None => "rejected by user".into(),
                    };
                    plan.cancel(reason)?;
                    state.plans.save(&plan);
                    uow.mark_plans();
                }
            }
            uow.commit("reject_plan")?;

            state.bus.publish(DomainEvent::new(
                DomainEventKind::PlanRejected,
                session_id,
                plan_id.clone(),
                approval.subject.clone(),
            ));
            fsm_apply_if_valid(state, session_id, FsmEvent::PlanRejected);

            let _ = tx
                .send(AgentEvent::PlanExecutionRejected { plan_id })
                .await;
            Ok(())
        }
        PlanDecision::Modify => {
            state.approvals.reject(
                approval_request_id,
                Some(match &feedback {
                    Some(f) => format!("modification requested: {f}"),
                    None => "modification requested".into(),
                }),
            )?;
            uow.mark_approvals();

            let goal = match state.plans.find_by_id(&plan_id) {
                Some(mut plan) => {
                    let goal = plan.goal.clone();
                    if !plan.status.is_terminal() {
                        plan.cancel("superseded by revised draft")?;
                        state.plans.save(&plan);
                        uow.mark_plans();
                    }
                    goal
                }
                None => approval.subject.clone(),
            };
            uow.commit("request_plan_modification")?;

            fsm_apply_if_valid(state, session_id, FsmEvent::PlanModificationRequested);
            run_planning(state, uow, tx, session_id, &goal, feedback.as_deref()).await
        }
    }
}

/// Shared approve path (explicit decision or policy waiver): validate
/// the DAG, move the plan to APPROVED, and run the first engine step.
async fn approve_plan(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    approval_request_id: Option<&str>,
    plan_id: &str,
) -> Result<()> {
    if let Some(request_id) = approval_request_id {
        state.approvals.approve(request_id)?;
        uow.mark_approvals();
        uow.commit("resolve_plan_approval")?;
    }

    let mut plan = state
        .plans
        .find_by_id(plan_id)
        .ok_or_else(|| Error::not_found("plan", plan_id))?;

    fsm_apply_if_valid(state, session_id, FsmEvent::PlanApproved);

    // Enforcement point for the dependency graph: approval fails on a
    // structurally invalid plan.
    let issues = DependencyResolver::validate(&plan);
    if !issues.is_empty() {
        let summary = issues.join("; ");
        plan.fail(format!("plan validation failed: {summary}"))?;
        state.plans.save(&plan);
        uow.mark_plans();
        uow.commit("fail_invalid_plan")?;

        state.bus.publish(
            DomainEvent::new(
                DomainEventKind::PlanFailed,
                session_id,
                plan_id,
                plan.goal.clone(),
            )
            .with_detail(serde_json::json!({ "errors": issues })),
        );
        fsm_apply_if_valid(state, session_id, FsmEvent::PlanExecutionFailed);

        let _ = tx
            .send(AgentEvent::Error {
                error: summary,
                is_final: Some(true),
                metadata: Some(serde_json::json!({ "plan_id": plan_id })),
            })
            .await;
        return Ok(());
    }

    plan.approve()?;
    state.plans.save(&plan);
    uow.mark_plans();
    uow.commit("approve_plan")?;
    state.bus.publish(DomainEvent::new(
        DomainEventKind::PlanApproved,
        session_id,
        plan_id,
        plan.goal.clone(),
    ));

    let _ = tx
        .send(AgentEvent::PlanExecutionStarted {
            plan_id: plan_id.to_string(),
        })
        .await;

    let outcome = state
        .engine
        .execute_plan(state, uow, tx, plan_id, session_id)
        .await?;
    finish_engine_outcome(state, session_id, outcome);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tool_result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process_tool_result(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    call_id: &str,
    result: Option<String>,
    error: Option<String>,
) -> Result<()> {
    // Duplicate delivery within the TTL is silently dropped: no events,
    // no state change.
    if state.dedupe.is_duplicate(session_id, call_id) {
        return Ok(());
    }
    state.dedupe.mark_processed(session_id, call_id);

    let conv = state
        .conversations
        .get(session_id)
        .ok_or_else(|| Error::not_found("session", session_id))?;
    let tool_call = conv
        .find_tool_call(call_id)
        .ok_or_else(|| {
            Error::Validation(format!("tool result references unknown call_id {call_id}"))
        })?
        .clone();

    let content = match (&result, &error) {
        (Some(r), _) => r.clone(),
        (None, Some(e)) => format!("[Error] {e}"),
        (None, None) => String::new(),
    };

    state.conversations.append_message(
        session_id,
        Message::tool_result(call_id, &tool_call.tool_name, &content),
    )?;
    uow.mark_conversation(session_id);
    // Make the tool result durable before anything else streams. A
    // failed micro-commit is reported to the client but the stream
    // continues; the append stays in memory for the scope-exit commit.
    if let Err(e) = uow.commit("process_tool_result") {
        tracing::error!(error = %e, "tool result micro-commit failed");
        let _ = tx
            .send(AgentEvent::Error {
                error: format!("persistence failure: {e}"),
                is_final: None,
                metadata: None,
            })
            .await;
    }

    let _ = tx
        .send(AgentEvent::ToolResult {
            call_id: call_id.to_string(),
            result,
            error,
        })
        .await;

    continue_active_agent(state, uow, tx, session_id).await
}

/// Continue the suspended agent from the current history, then do the
/// plan bookkeeping a finished continuation implies.
async fn continue_active_agent(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
) -> Result<()> {
    let active_plan = state
        .plans
        .find_active_by_session(session_id)
        .filter(|p| p.status == PlanStatus::InProgress);
    let running = active_plan
        .as_ref()
        .and_then(|p| p.running_subtask().cloned());

    let (agent_kind, context) = match (&active_plan, &running) {
        (Some(plan), Some(subtask)) => (
            subtask.agent,
            serde_json::json!({
                "subtask_id": subtask.id,
                "plan_id": plan.id,
                "plan_goal": plan.goal,
                "execution_mode": "subtask",
            }),
        ),
        _ => {
            let tag = state
                .conversations
                .active_agent(session_id)
                .unwrap_or_else(|| "orchestrator".into());
            (AgentKind::parse(&tag)?, serde_json::json!({}))
        }
    };

    let agent = state.registry.get(agent_kind)?;
    let outcome = agent
        .process(
            AgentInvocation {
                session_id,
                message: None,
                context,
            },
            uow,
            tx,
        )
        .await?;

    match (active_plan, running) {
        (Some(plan), Some(subtask)) => match outcome {
            TurnOutcome::Final(content) => {
                let settled = state
                    .engine
                    .executor()
                    .finish_running_subtask(
                        state,
                        uow,
                        tx,
                        &plan.id,
                        &subtask.id,
                        session_id,
                        Ok(content),
                    )
                    .await?;
                if settled == SubtaskOutcome::Failed {
                    fsm_apply_if_valid(state, session_id, FsmEvent::PlanExecutionFailed);
                    return Ok(());
                }
                // Advance the plan one step.
                let engine_outcome = state
                    .engine
                    .execute_plan(state, uow, tx, &plan.id, session_id)
                    .await?;
                finish_engine_outcome(state, session_id, engine_outcome);
                Ok(())
            }
            TurnOutcome::Failed(error) => {
                state
                    .engine
                    .executor()
                    .finish_running_subtask(
                        state,
                        uow,
                        tx,
                        &plan.id,
                        &subtask.id,
                        session_id,
                        Err(error),
                    )
                    .await?;
                fsm_apply_if_valid(state, session_id, FsmEvent::PlanExecutionFailed);
                Ok(())
            }
            TurnOutcome::Suspended { .. } => {
                // The same subtask emitted another tool call; nothing to
                // settle yet.
                Ok(())
            }
        },
        _ => {
            match outcome {
                TurnOutcome::Final(_) => fsm_complete_flow(state, session_id),
                TurnOutcome::Failed(message) => {
                    fsm_fail_flow(state, session_id);
                    let _ = tx.send(AgentEvent::fatal(message)).await;
                }
                TurnOutcome::Suspended { .. } => {}
            }
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// hitl_decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn handle_hitl(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    call_id: &str,
    decision: HitlDecision,
    modified_arguments: Option<serde_json::Value>,
    feedback: Option<String>,
) -> Result<()> {
    let approval = state
        .approvals
        .get_pending(call_id)
        .ok_or_else(|| Error::not_found("approval request", call_id))?;
    if approval.kind != ApprovalKind::Tool {
        return Err(Error::Validation(format!(
            "approval {call_id} is not a tool approval"
        )));
    }

    match decision {
        HitlDecision::Approve | HitlDecision::Edit => {
            let arguments = if decision == HitlDecision::Edit {
                let arguments = modified_arguments.ok_or_else(|| {
                    Error::Validation("edit decision requires modified_arguments".into())
                })?;
                state
                    .conversations
                    .update_tool_call_arguments(session_id, call_id, arguments.clone())?;
                uow.mark_conversation(session_id);
                arguments
            } else {
                approval.details.clone()
            };

            state.approvals.approve(call_id)?;
            uow.mark_approvals();
            uow.commit("resolve_tool_approval")?;

            // Hand the approved call to the client for execution; the
            // tool result will arrive as its own frame.
            let _ = tx
                .send(AgentEvent::ToolCall {
                    call_id: call_id.to_string(),
                    tool_name: approval.subject.clone(),
                    arguments,
                    requires_approval: Some(false),
                })
                .await;
            Ok(())
        }
        HitlDecision::Reject => {
            state.approvals.reject(call_id, feedback.clone())?;
            uow.mark_approvals();

            let note = match &feedback {
                Some(f) => format!("Tool call rejected by user: {f}"),
                None => "Tool call rejected by user".into(),
            };
            state.conversations.append_message(
                session_id,
                Message::tool_result(call_id, &approval.subject, note),
            )?;
            uow.mark_conversation(session_id);
            uow.commit("record_tool_rejection")?;

            // Let the agent react to the rejection.
            continue_active_agent(state, uow, tx, session_id).await
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// switch_agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn switch_agent(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    agent_type: &str,
    content: Option<String>,
) -> Result<()> {
    let kind = AgentKind::parse(agent_type)?;
    state.conversations.get_or_create(session_id);
    let previous = state
        .conversations
        .set_active_agent(session_id, kind.as_str())?;
    uow.mark_conversation(session_id);
    uow.commit("switch_agent")?;

    state.bus.publish(DomainEvent::new(
        DomainEventKind::AgentSwitched,
        session_id,
        session_id,
        kind.as_str(),
    ));
    let _ = tx
        .send(AgentEvent::AgentSwitched {
            from_agent: previous,
            to_agent: kind.as_str().to_string(),
            reason: "user requested".into(),
        })
        .await;

    let content = match content {
        Some(c) if !c.trim().is_empty() => c,
        _ => return Ok(()),
    };

    // An explicit switch bypasses classification, but the FSM still
    // walks its table.
    normalize_fsm_for_new_task(state, session_id)?;
    state
        .fsm
        .transition(session_id, FsmEvent::ReceiveMessage, None)?;

    if kind == AgentKind::Architect {
        state
            .fsm
            .transition(session_id, FsmEvent::IsAtomicFalse, None)?;
        state
            .fsm
            .transition(session_id, FsmEvent::RouteToArchitect, None)?;
        run_planning(state, uow, tx, session_id, &content, None).await
    } else {
        state
            .fsm
            .transition(session_id, FsmEvent::IsAtomicTrue, None)?;
        route_and_run(state, uow, tx, session_id, kind, &content).await
    }
}

fn normalize_fsm_for_new_task(state: &AppState, session_id: &str) -> Result<()> {
    match state.fsm.current_state(session_id) {
        FsmState::Idle => {}
        FsmState::Completed => {
            state.fsm.transition(session_id, FsmEvent::Reset, None)?;
        }
        FsmState::ErrorHandling => {
            state
                .fsm
                .transition(session_id, FsmEvent::PlanCancelled, None)?;
            state.fsm.transition(session_id, FsmEvent::Reset, None)?;
        }
        other => {
            tracing::warn!(
                session_id = %session_id,
                state = other.as_str(),
                "recovering stale fsm state"
            );
            state.fsm.reset(session_id);
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan continuation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Advance an in-progress plan on a client "continue" request.
async fn continue_plan(
    state: &AppState,
    uow: &mut UnitOfWork,
    tx: &mpsc::Sender<AgentEvent>,
    session_id: &str,
    plan_id: &str,
) -> Result<()> {
    let plan = state
        .plans
        .find_by_id(plan_id)
        .ok_or_else(|| Error::not_found("plan", plan_id))?;

    // A running subtask is waiting on tool results; a user message
    // cannot advance it.
    if let Some(running) = plan.running_subtask() {
        let _ = tx
            .send(AgentEvent::Status {
                content: format!(
                    "Subtask {} is waiting for tool results before execution can continue",
                    running.id
                ),
                metadata: Some(serde_json::json!({ "subtask_id": running.id })),
            })
            .await;
        return Ok(());
    }

    // Failed subtasks with nothing ready: interpret the message as a
    // retry request for the first failure.
    let has_ready = plan.next_subtask().is_some();
    let first_failed = plan
        .subtasks
        .iter()
        .find(|s| s.status == SubtaskStatus::Failed)
        .map(|s| s.id.clone());
    if !has_ready {
        if let Some(subtask_id) = first_failed {
            fsm_apply_if_valid(state, session_id, FsmEvent::RetrySubtask);
            let outcome = state
                .engine
                .executor()
                .retry_failed_subtask(state, uow, tx, plan_id, &subtask_id, session_id)
                .await?;
            if outcome == SubtaskOutcome::Done {
                // More work may be ready now; take one engine step.
                let engine_outcome = state
                    .engine
                    .execute_plan(state, uow, tx, plan_id, session_id)
                    .await?;
                finish_engine_outcome(state, session_id, engine_outcome);
            }
            return Ok(());
        }
    }

    let outcome = state
        .engine
        .execute_plan(state, uow, tx, plan_id, session_id)
        .await?;
    finish_engine_outcome(state, session_id, outcome);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FSM helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Completion path for whichever execution state the session is in.
fn fsm_complete_flow(state: &AppState, session_id: &str) {
    let event = match state.fsm.current_state(session_id) {
        FsmState::Execution => FsmEvent::AllSubtasksDone,
        FsmState::PlanExecution => FsmEvent::PlanExecutionCompleted,
        _ => return,
    };
    fsm_apply_if_valid(state, session_id, event);
    fsm_apply_if_valid(state, session_id, FsmEvent::Reset);
}

/// Failure path for whichever execution state the session is in.
fn fsm_fail_flow(state: &AppState, session_id: &str) {
    let event = match state.fsm.current_state(session_id) {
        FsmState::Execution => FsmEvent::SubtaskFailed,
        FsmState::PlanExecution => FsmEvent::PlanExecutionFailed,
        FsmState::Classify => FsmEvent::ClassifyError,
        _ => return,
    };
    fsm_apply_if_valid(state, session_id, event);
}

/// Apply an event when the current state accepts it; skip (with a log)
/// otherwise. Used on post-outcome paths that may run against a
/// recovered context.
fn fsm_apply_if_valid(state: &AppState, session_id: &str, event: FsmEvent) {
    if state.fsm.can_transition(session_id, event) {
        if let Err(e) = state.fsm.transition(session_id, event, None) {
            tracing::warn!(session_id = %session_id, error = %e, "fsm transition failed");
        }
    } else {
        tracing::debug!(
            session_id = %session_id,
            state = state.fsm.current_state(session_id).as_str(),
            event = ?event,
            "skipping inapplicable fsm event"
        );
    }
}

fn finish_engine_outcome(state: &AppState, session_id: &str, outcome: EngineOutcome) {
    match outcome {
        EngineOutcome::PlanCompleted => fsm_complete_flow(state, session_id),
        EngineOutcome::PlanFailed | EngineOutcome::SubtaskFailed => {
            fsm_fail_flow(state, session_id)
        }
        EngineOutcome::SubtaskDone
        | EngineOutcome::Suspended { .. }
        | EngineOutcome::InProgress => {}
    }
}
