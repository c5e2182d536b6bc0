use serde::{Deserialize, Serialize};

use crate::approval::ApprovalKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// Master switch. When false, nothing requires approval.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Applied when no rule matches.
    #[serde(default)]
    pub default_requires_approval: bool,
    /// First matching rule wins.
    #[serde(default = "d_rules")]
    pub rules: Vec<ApprovalRuleConfig>,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_requires_approval: false,
            rules: d_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRuleConfig {
    pub kind: ApprovalKind,
    /// Regex matched against the subject (tool name or plan goal).
    pub subject_pattern: String,
    /// All conditions must hold for the rule to match.
    #[serde(default)]
    pub conditions: Vec<ApprovalConditionConfig>,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A predicate on one argument of the gated call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApprovalConditionConfig {
    /// String length (or serialized length) of the argument exceeds `value`.
    SizeGt { argument_key: String, value: u64 },
    /// The argument is a string starting with `value`.
    PathPrefix { argument_key: String, value: String },
    /// The argument equals `value` exactly.
    Equals {
        argument_key: String,
        value: serde_json::Value,
    },
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}

/// Stock policy: mutating filesystem and shell tools are gated.
fn d_rules() -> Vec<ApprovalRuleConfig> {
    vec![
        ApprovalRuleConfig {
            kind: ApprovalKind::Tool,
            subject_pattern: "^(write_file|delete_file|move_file)$".into(),
            conditions: Vec::new(),
            requires_approval: true,
            reason: Some("File modification requires approval".into()),
        },
        ApprovalRuleConfig {
            kind: ApprovalKind::Tool,
            subject_pattern: "^(run_command|execute_shell)$".into(),
            conditions: Vec::new(),
            requires_approval: true,
            reason: Some("Shell execution requires approval".into()),
        },
        ApprovalRuleConfig {
            kind: ApprovalKind::Plan,
            subject_pattern: ".*".into(),
            conditions: Vec::new(),
            requires_approval: true,
            reason: Some("Plan execution requires approval".into()),
        },
    ]
}
