//! Per-session finite state machine.
//!
//! The canonical transition table lives in [`TransitionRules::next_state`];
//! everything outside it is invalid and raises. Contexts are transient:
//! they live in a process-wide concurrent map and are recreated on demand
//! (session state is recoverable from the persisted plan and approvals).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ens_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States & events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmState {
    Idle,
    Classify,
    PlanRequired,
    ArchitectPlanning,
    PlanReview,
    PlanExecution,
    Execution,
    ErrorHandling,
    Completed,
}

impl FsmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsmState::Idle => "idle",
            FsmState::Classify => "classify",
            FsmState::PlanRequired => "plan_required",
            FsmState::ArchitectPlanning => "architect_planning",
            FsmState::PlanReview => "plan_review",
            FsmState::PlanExecution => "plan_execution",
            FsmState::Execution => "execution",
            FsmState::ErrorHandling => "error_handling",
            FsmState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmEvent {
    ReceiveMessage,
    IsAtomicTrue,
    IsAtomicFalse,
    ClassifyError,
    RouteToArchitect,
    PlanCreated,
    PlanApproved,
    PlanRejected,
    PlanModificationRequested,
    PlanExecutionCompleted,
    PlanExecutionFailed,
    AllSubtasksDone,
    SubtaskFailed,
    RetrySubtask,
    RequiresReplanning,
    PlanCancelled,
    Reset,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TransitionRules;

impl TransitionRules {
    /// The canonical table. Everything not listed is invalid.
    pub fn next_state(from: FsmState, event: FsmEvent) -> Option<FsmState> {
        use FsmEvent::*;
        use FsmState::*;
        match (from, event) {
            (Idle, ReceiveMessage) => Some(Classify),
            (Classify, IsAtomicTrue) => Some(Execution),
            (Classify, IsAtomicFalse) => Some(PlanRequired),
            (Classify, ClassifyError) => Some(ErrorHandling),
            (PlanRequired, RouteToArchitect) => Some(ArchitectPlanning),
            (ArchitectPlanning, PlanCreated) => Some(PlanReview),
            (PlanReview, PlanApproved) => Some(PlanExecution),
            (PlanReview, PlanRejected) => Some(Idle),
            (PlanReview, PlanModificationRequested) => Some(ArchitectPlanning),
            (PlanExecution, PlanExecutionCompleted) => Some(Completed),
            (PlanExecution, PlanExecutionFailed) => Some(ErrorHandling),
            (Execution, AllSubtasksDone) => Some(Completed),
            (Execution, SubtaskFailed) => Some(ErrorHandling),
            (ErrorHandling, RetrySubtask) => Some(Execution),
            (ErrorHandling, RequiresReplanning) => Some(ArchitectPlanning),
            (ErrorHandling, PlanCancelled) => Some(Completed),
            (Completed, Reset) => Some(Idle),
            _ => None,
        }
    }

    /// Pure validity predicate.
    pub fn is_valid_transition(from: FsmState, event: FsmEvent) -> bool {
        Self::next_state(from, event).is_some()
    }

    /// Events accepted in `from`.
    pub fn allowed_events(from: FsmState) -> Vec<FsmEvent> {
        use FsmEvent::*;
        [
            ReceiveMessage,
            IsAtomicTrue,
            IsAtomicFalse,
            ClassifyError,
            RouteToArchitect,
            PlanCreated,
            PlanApproved,
            PlanRejected,
            PlanModificationRequested,
            PlanExecutionCompleted,
            PlanExecutionFailed,
            AllSubtasksDone,
            SubtaskFailed,
            RetrySubtask,
            RequiresReplanning,
            PlanCancelled,
            Reset,
        ]
        .into_iter()
        .filter(|e| Self::is_valid_transition(from, *e))
        .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session machine state plus free-form metadata.
#[derive(Debug, Clone)]
pub struct FsmContext {
    pub session_id: String,
    pub current_state: FsmState,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FsmContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_state: FsmState::Idle,
            metadata: HashMap::new(),
        }
    }

    pub fn can_transition(&self, event: FsmEvent) -> bool {
        TransitionRules::is_valid_transition(self.current_state, event)
    }

    pub fn transition(&mut self, event: FsmEvent) -> Result<FsmState> {
        match TransitionRules::next_state(self.current_state, event) {
            Some(next) => {
                self.current_state = next;
                Ok(next)
            }
            None => Err(Error::InvalidTransition(format!(
                "event {event:?} is not valid in state {}",
                self.current_state.as_str()
            ))),
        }
    }

    pub fn reset(&mut self) {
        self.current_state = FsmState::Idle;
        self.metadata.clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concurrent map of per-session FSM contexts. Per-session mutation
/// happens under the session lock; the map itself is its own guard.
#[derive(Default)]
pub struct FsmOrchestrator {
    contexts: RwLock<HashMap<String, FsmContext>>,
}

impl FsmOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, `Idle` for sessions with no context yet.
    pub fn current_state(&self, session_id: &str) -> FsmState {
        self.contexts
            .read()
            .get(session_id)
            .map(|c| c.current_state)
            .unwrap_or(FsmState::Idle)
    }

    /// Apply an event, creating the context on demand.
    pub fn transition(
        &self,
        session_id: &str,
        event: FsmEvent,
        metadata: Option<serde_json::Value>,
    ) -> Result<FsmState> {
        let mut contexts = self.contexts.write();
        let ctx = contexts
            .entry(session_id.to_owned())
            .or_insert_with(|| FsmContext::new(session_id));
        let from = ctx.current_state;
        let next = ctx.transition(event)?;
        if let Some(meta) = metadata {
            ctx.metadata
                .insert(format!("{event:?}"), meta);
        }
        tracing::debug!(
            session_id = %session_id,
            from = from.as_str(),
            to = next.as_str(),
            event = ?event,
            "fsm transition"
        );
        Ok(next)
    }

    pub fn can_transition(&self, session_id: &str, event: FsmEvent) -> bool {
        TransitionRules::is_valid_transition(self.current_state(session_id), event)
    }

    /// Force a session back to IDLE, clearing metadata.
    pub fn reset(&self, session_id: &str) {
        let mut contexts = self.contexts.write();
        if let Some(ctx) = contexts.get_mut(session_id) {
            ctx.reset();
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.contexts.write().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.contexts.read().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
