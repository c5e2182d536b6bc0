use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What kind of decision a pending approval is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    /// A single gated tool invocation (human-in-the-loop).
    Tool,
    /// A whole drafted execution plan.
    Plan,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::Tool => "tool",
            ApprovalKind::Plan => "plan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A decision waiting on the user.
///
/// `request_id` is the tool call id for TOOL approvals and a generated id
/// for PLAN approvals. Status moves monotonically: pending to approved or
/// rejected, never back and never across.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: String,
    pub kind: ApprovalKind,
    /// Tool name or plan goal.
    pub subject: String,
    pub session_id: String,
    /// Tool arguments or plan summary.
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

impl PendingApproval {
    pub fn new(
        request_id: impl Into<String>,
        kind: ApprovalKind,
        subject: impl Into<String>,
        session_id: impl Into<String>,
        details: serde_json::Value,
        reason: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            subject: subject.into(),
            session_id: session_id.into(),
            details,
            reason,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decision_reason: None,
        }
    }

    /// pending -> approved. Re-resolving is an error.
    pub fn approve(&mut self) -> Result<()> {
        self.resolve(ApprovalStatus::Approved, None)
    }

    /// pending -> rejected. Re-resolving is an error.
    pub fn reject(&mut self, reason: Option<String>) -> Result<()> {
        self.resolve(ApprovalStatus::Rejected, reason)
    }

    fn resolve(&mut self, status: ApprovalStatus, reason: Option<String>) -> Result<()> {
        if self.status != ApprovalStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "approval {} already resolved",
                self.request_id
            )));
        }
        self.status = status;
        self.decided_at = Some(Utc::now());
        self.decision_reason = reason;
        Ok(())
    }
}
