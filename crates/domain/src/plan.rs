//! Execution plans and their subtasks.
//!
//! A plan is the unit the user approves: a goal decomposed into subtasks
//! forming a dependency DAG, each assigned to one specialist agent. Both
//! entities carry explicit status machines; every transition method
//! enforces its precondition and returns an error instead of mutating on
//! an invalid path.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::error::{Error, Result};

/// Upper bound on goal and subtask description length.
pub const MAX_GOAL_LEN: usize = 5000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    /// Terminal statuses freeze the plan.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Approved => "approved",
            PlanStatus::InProgress => "in_progress",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Blocked,
    Running,
    Done,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubtaskStatus::Done | SubtaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::Blocked => "blocked",
            SubtaskStatus::Running => "running",
            SubtaskStatus::Done => "done",
            SubtaskStatus::Failed => "failed",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subtask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A unit of work within a plan, assigned to exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub agent: AgentKind,
    /// Ids of subtasks in the same plan that must be DONE first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Subtask {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        agent: AgentKind,
        dependencies: Vec<String>,
    ) -> Result<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(Error::Validation("subtask description cannot be empty".into()));
        }
        if description.len() > MAX_GOAL_LEN {
            return Err(Error::Validation(format!(
                "subtask description exceeds {MAX_GOAL_LEN} chars"
            )));
        }
        if !agent.can_execute_subtasks() {
            return Err(Error::Validation(
                "architect agent cannot be assigned to subtasks; it only creates plans".into(),
            ));
        }
        Ok(Self {
            id: id.into(),
            description,
            agent,
            dependencies,
            status: SubtaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        })
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self) -> Result<()> {
        if self.status != SubtaskStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "cannot start subtask {} in status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = SubtaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING -> DONE.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<()> {
        if self.status != SubtaskStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "cannot complete subtask {} in status {}",
                self.id,
                self.status.as_str()
            )));
        }
        let result = result.into();
        if result.is_empty() {
            return Err(Error::Validation("subtask result cannot be empty".into()));
        }
        self.status = SubtaskStatus::Done;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING -> FAILED.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        if self.status != SubtaskStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "cannot fail subtask {} in status {}",
                self.id,
                self.status.as_str()
            )));
        }
        let error = error.into();
        if error.is_empty() {
            return Err(Error::Validation("subtask error cannot be empty".into()));
        }
        self.status = SubtaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// FAILED -> PENDING, the single permitted retry transition.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != SubtaskStatus::Failed {
            return Err(Error::InvalidTransition(format!(
                "cannot retry subtask {} in status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = SubtaskStatus::Pending;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// PENDING -> BLOCKED (transient, set while dependencies are unmet).
    pub fn block(&mut self) {
        if self.status == SubtaskStatus::Pending {
            self.status = SubtaskStatus::Blocked;
        }
    }

    /// BLOCKED -> PENDING.
    pub fn unblock(&mut self) {
        if self.status == SubtaskStatus::Blocked {
            self.status = SubtaskStatus::Pending;
        }
    }

    /// Ready when PENDING and every dependency is in the done set.
    pub fn is_ready(&self, done_ids: &HashSet<&str>) -> bool {
        self.status == SubtaskStatus::Pending
            && self.dependencies.iter().all(|d| done_ids.contains(d.as_str()))
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts of subtasks by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
}

impl PlanProgress {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total,
            "done": self.done,
            "failed": self.failed,
            "running": self.running,
            "pending": self.pending,
            "percentage": if self.total > 0 {
                self.done as f64 / self.total as f64 * 100.0
            } else {
                0.0
            },
        })
    }
}

/// A decomposed task awaiting or undergoing execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub conversation_id: String,
    pub goal: String,
    pub subtasks: Vec<Subtask>,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_subtask_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        goal: impl Into<String>,
    ) -> Result<Self> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(Error::Validation("plan goal cannot be empty".into()));
        }
        if goal.len() > MAX_GOAL_LEN {
            return Err(Error::Validation(format!(
                "plan goal exceeds {MAX_GOAL_LEN} chars"
            )));
        }
        Ok(Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            goal,
            subtasks: Vec::new(),
            status: PlanStatus::Draft,
            current_subtask_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            approved_at: None,
            started_at: None,
            completed_at: None,
        })
    }

    /// Add a subtask; only legal while the plan is a draft.
    pub fn add_subtask(&mut self, subtask: Subtask) -> Result<()> {
        if self.status != PlanStatus::Draft {
            return Err(Error::InvalidTransition(format!(
                "cannot add subtask to plan in status {}",
                self.status.as_str()
            )));
        }
        if self.subtasks.iter().any(|s| s.id == subtask.id) {
            return Err(Error::Validation(format!(
                "duplicate subtask id {} in plan {}",
                subtask.id, self.id
            )));
        }
        self.subtasks.push(subtask);
        Ok(())
    }

    /// DRAFT -> APPROVED. An empty plan cannot leave DRAFT.
    pub fn approve(&mut self) -> Result<()> {
        if self.status != PlanStatus::Draft {
            return Err(Error::InvalidTransition(format!(
                "cannot approve plan in status {}",
                self.status.as_str()
            )));
        }
        if self.subtasks.is_empty() {
            return Err(Error::Validation("cannot approve empty plan".into()));
        }
        self.status = PlanStatus::Approved;
        self.approved_at = Some(Utc::now());
        Ok(())
    }

    /// APPROVED -> IN_PROGRESS.
    pub fn start_execution(&mut self) -> Result<()> {
        if self.status != PlanStatus::Approved {
            return Err(Error::InvalidTransition(format!(
                "cannot start execution of plan in status {}",
                self.status.as_str()
            )));
        }
        self.status = PlanStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETED. Requires every subtask DONE.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != PlanStatus::InProgress {
            return Err(Error::InvalidTransition(format!(
                "cannot complete plan in status {}",
                self.status.as_str()
            )));
        }
        if !self.subtasks.iter().all(|s| s.status == SubtaskStatus::Done) {
            return Err(Error::Validation(
                "cannot complete plan with unfinished subtasks".into(),
            ));
        }
        self.status = PlanStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.current_subtask_id = None;
        Ok(())
    }

    /// Any non-terminal status -> FAILED, recording the reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "cannot fail plan in terminal status {}",
                self.status.as_str()
            )));
        }
        let reason = reason.into();
        if reason.is_empty() {
            return Err(Error::Validation("failure reason cannot be empty".into()));
        }
        self.status = PlanStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.metadata
            .insert("failure_reason".into(), serde_json::json!(reason));
        Ok(())
    }

    /// Any status except COMPLETED -> CANCELLED, recording the reason.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status == PlanStatus::Completed {
            return Err(Error::InvalidTransition("cannot cancel completed plan".into()));
        }
        let reason = reason.into();
        if reason.is_empty() {
            return Err(Error::Validation("cancellation reason cannot be empty".into()));
        }
        self.status = PlanStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.metadata
            .insert("cancellation_reason".into(), serde_json::json!(reason));
        Ok(())
    }

    pub fn get_subtask(&self, subtask_id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == subtask_id)
    }

    pub fn get_subtask_mut(&mut self, subtask_id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == subtask_id)
    }

    /// Ids of DONE subtasks.
    pub fn done_ids(&self) -> HashSet<&str> {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Done)
            .map(|s| s.id.as_str())
            .collect()
    }

    /// The next ready subtask, or None. Only meaningful while IN_PROGRESS.
    pub fn next_subtask(&self) -> Option<&Subtask> {
        if self.status != PlanStatus::InProgress {
            return None;
        }
        let done = self.done_ids();
        self.subtasks.iter().find(|s| s.is_ready(&done))
    }

    /// The RUNNING subtask, if any (awaiting a tool-result continuation).
    pub fn running_subtask(&self) -> Option<&Subtask> {
        self.subtasks
            .iter()
            .find(|s| s.status == SubtaskStatus::Running)
    }

    pub fn progress(&self) -> PlanProgress {
        let total = self.subtasks.len();
        let done = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Done)
            .count();
        let failed = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Failed)
            .count();
        let running = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Running)
            .count();
        PlanProgress {
            total,
            done,
            failed,
            running,
            pending: total - done - failed - running,
        }
    }

    /// Short form for approval prompts and events.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "goal": self.goal,
            "subtasks_count": self.subtasks.len(),
            "subtasks": self.subtasks.iter().map(|s| serde_json::json!({
                "id": s.id,
                "description": s.description,
                "agent": s.agent.as_str(),
                "dependencies": s.dependencies,
            })).collect::<Vec<_>>(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
