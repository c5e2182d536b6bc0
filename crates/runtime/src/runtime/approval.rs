//! Approval manager: the policy that decides what needs a human, and the
//! lifecycle of the resulting pending approvals.
//!
//! Rules compile to regexes at startup; evaluation is first-match-wins
//! over `(kind, subject, arguments)`. Every lifecycle mutation publishes
//! a domain event for the metrics and audit subscribers.

use std::sync::Arc;

use ens_domain::approval::{ApprovalKind, PendingApproval};
use ens_domain::config::{ApprovalConditionConfig, ApprovalRuleConfig, ApprovalsConfig};
use ens_domain::error::{Error, Result};
use ens_sessions::ApprovalStore;

use super::events::{DomainEvent, DomainEventKind, EventBus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CompiledRule {
    kind: ApprovalKind,
    subject: regex::Regex,
    conditions: Vec<ApprovalConditionConfig>,
    requires_approval: bool,
    reason: Option<String>,
}

impl CompiledRule {
    fn compile(rule: &ApprovalRuleConfig) -> Result<Self> {
        let subject = regex::Regex::new(&rule.subject_pattern).map_err(|e| {
            Error::Config(format!(
                "invalid approval subject pattern {:?}: {e}",
                rule.subject_pattern
            ))
        })?;
        Ok(Self {
            kind: rule.kind,
            subject,
            conditions: rule.conditions.clone(),
            requires_approval: rule.requires_approval,
            reason: rule.reason.clone(),
        })
    }

    fn matches(&self, kind: ApprovalKind, subject: &str, arguments: &serde_json::Value) -> bool {
        if self.kind != kind || !self.subject.is_match(subject) {
            return false;
        }
        self.conditions
            .iter()
            .all(|c| condition_holds(c, arguments))
    }
}

fn condition_holds(condition: &ApprovalConditionConfig, arguments: &serde_json::Value) -> bool {
    match condition {
        ApprovalConditionConfig::SizeGt {
            argument_key,
            value,
        } => {
            let size = match arguments.get(argument_key) {
                Some(serde_json::Value::String(s)) => s.len() as u64,
                Some(other) => other.to_string().len() as u64,
                None => return false,
            };
            size > *value
        }
        ApprovalConditionConfig::PathPrefix {
            argument_key,
            value,
        } => arguments
            .get(argument_key)
            .and_then(|v| v.as_str())
            .map(|s| s.starts_with(value.as_str()))
            .unwrap_or(false),
        ApprovalConditionConfig::Equals {
            argument_key,
            value,
        } => arguments.get(argument_key) == Some(value),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ApprovalManager {
    store: Arc<ApprovalStore>,
    bus: Arc<EventBus>,
    enabled: bool,
    default_requires_approval: bool,
    rules: Vec<CompiledRule>,
}

impl ApprovalManager {
    pub fn new(
        config: &ApprovalsConfig,
        store: Arc<ApprovalStore>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            store,
            bus,
            enabled: config.enabled,
            default_requires_approval: config.default_requires_approval,
            rules,
        })
    }

    /// Policy decision for one subject. First matching rule wins; the
    /// configured default applies otherwise. Returns the reason alongside
    /// a positive decision.
    pub fn should_require_approval(
        &self,
        kind: ApprovalKind,
        subject: &str,
        arguments: &serde_json::Value,
    ) -> (bool, Option<String>) {
        if !self.enabled {
            return (false, None);
        }
        for rule in &self.rules {
            if rule.matches(kind, subject, arguments) {
                let reason = if rule.requires_approval {
                    rule.reason.clone()
                } else {
                    None
                };
                return (rule.requires_approval, reason);
            }
        }
        (self.default_requires_approval, None)
    }

    /// Register a pending approval and announce it.
    pub fn add_pending(&self, approval: PendingApproval) -> Result<()> {
        let event = DomainEvent::new(
            DomainEventKind::ApprovalRequested,
            approval.session_id.clone(),
            approval.request_id.clone(),
            approval.subject.clone(),
        )
        .with_detail(serde_json::json!({ "kind": approval.kind.as_str() }));

        self.store.add_pending(approval)?;
        self.bus.publish(event);
        Ok(())
    }

    pub fn get_pending(&self, request_id: &str) -> Option<PendingApproval> {
        self.store.get_pending(request_id)
    }

    pub fn get_all_pending(
        &self,
        session_id: &str,
        kind: Option<ApprovalKind>,
    ) -> Vec<PendingApproval> {
        self.store.get_all_pending(session_id, kind)
    }

    pub fn approve(&self, request_id: &str) -> Result<PendingApproval> {
        let approval = self.store.approve(request_id)?;
        self.bus.publish(
            DomainEvent::new(
                DomainEventKind::ApprovalGranted,
                approval.session_id.clone(),
                approval.request_id.clone(),
                approval.subject.clone(),
            )
            .with_detail(serde_json::json!({ "kind": approval.kind.as_str() })),
        );
        Ok(approval)
    }

    pub fn reject(&self, request_id: &str, reason: Option<String>) -> Result<PendingApproval> {
        let approval = self.store.reject(request_id, reason.clone())?;
        self.bus.publish(
            DomainEvent::new(
                DomainEventKind::ApprovalRejected,
                approval.session_id.clone(),
                approval.request_id.clone(),
                approval.subject.clone(),
            )
            .with_detail(serde_json::json!({
                "kind": approval.kind.as_str(),
                "reason": reason,
            })),
        );
        Ok(approval)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::{AuditLog, MetricsCollector};

    fn config_with_rules(rules: Vec<ApprovalRuleConfig>) -> ApprovalsConfig {
        ApprovalsConfig {
            enabled: true,
            default_requires_approval: false,
            rules,
        }
    }

    fn manager(config: ApprovalsConfig) -> (tempfile::TempDir, ApprovalManager, Arc<AuditLog>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ApprovalStore::new(dir.path()).unwrap());
        let bus = Arc::new(EventBus::new());
        let audit = Arc::new(AuditLog::new(100));
        bus.subscribe(audit.clone());
        bus.subscribe(Arc::new(MetricsCollector::new()));
        let mgr = ApprovalManager::new(&config, store, bus).unwrap();
        (dir, mgr, audit)
    }

    fn write_file_rule() -> ApprovalRuleConfig {
        ApprovalRuleConfig {
            kind: ApprovalKind::Tool,
            subject_pattern: "^write_file$".into(),
            conditions: vec![],
            requires_approval: true,
            reason: Some("File modification requires approval".into()),
        }
    }

    #[test]
    fn matching_rule_requires_approval_with_reason() {
        let (_d, mgr, _) = manager(config_with_rules(vec![write_file_rule()]));
        let (requires, reason) = mgr.should_require_approval(
            ApprovalKind::Tool,
            "write_file",
            &serde_json::json!({"path": "test.py"}),
        );
        assert!(requires);
        assert_eq!(reason.as_deref(), Some("File modification requires approval"));
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let (_d, mgr, _) = manager(config_with_rules(vec![write_file_rule()]));
        let (requires, reason) =
            mgr.should_require_approval(ApprovalKind::Tool, "unknown_tool", &serde_json::json!({}));
        assert!(!requires);
        assert!(reason.is_none());
    }

    #[test]
    fn explicit_no_approval_rule_wins() {
        let mut read_rule = write_file_rule();
        read_rule.subject_pattern = "^read_file$".into();
        read_rule.requires_approval = false;
        read_rule.reason = None;
        let (_d, mgr, _) = manager(config_with_rules(vec![read_rule, write_file_rule()]));

        let (requires, _) =
            mgr.should_require_approval(ApprovalKind::Tool, "read_file", &serde_json::json!({}));
        assert!(!requires);
    }

    #[test]
    fn disabled_policy_never_requires_approval() {
        let mut config = config_with_rules(vec![write_file_rule()]);
        config.enabled = false;
        config.default_requires_approval = true;
        let (_d, mgr, _) = manager(config);

        let (requires, _) =
            mgr.should_require_approval(ApprovalKind::Tool, "write_file", &serde_json::json!({}));
        assert!(!requires);
    }

    #[test]
    fn size_gt_condition() {
        let mut rule = write_file_rule();
        rule.conditions = vec![ApprovalConditionConfig::SizeGt {
            argument_key: "content".into(),
            value: 5,
        }];
        let (_d, mgr, _) = manager(config_with_rules(vec![rule]));

        let (requires, _) = mgr.should_require_approval(
            ApprovalKind::Tool,
            "write_file",
            &serde_json::json!({"content": "tiny"}),
        );
        assert!(!requires, "short content should not match size_gt 5");

        let (requires, _) = mgr.should_require_approval(
            ApprovalKind::Tool,
            "write_file",
            &serde_json::json!({"content": "long enough"}),
        );
        assert!(requires);
    }

    #[test]
    fn path_prefix_condition() {
        let mut rule = write_file_rule();
        rule.conditions = vec![ApprovalConditionConfig::PathPrefix {
            argument_key: "path".into(),
            value: "/etc".into(),
        }];
        let (_d, mgr, _) = manager(config_with_rules(vec![rule]));

        let (requires, _) = mgr.should_require_approval(
            ApprovalKind::Tool,
            "write_file",
            &serde_json::json!({"path": "/etc/passwd"}),
        );
        assert!(requires);

        let (requires, _) = mgr.should_require_approval(
            ApprovalKind::Tool,
            "write_file",
            &serde_json::json!({"path": "/tmp/x"}),
        );
        assert!(!requires);
    }

    #[test]
    fn lifecycle_publishes_events() {
        let (_d, mgr, audit) = manager(config_with_rules(vec![write_file_rule()]));
        mgr.add_pending(PendingApproval::new(
            "c-1",
            ApprovalKind::Tool,
            "write_file",
            "s-1",
            serde_json::json!({}),
            None,
        ))
        .unwrap();
        mgr.approve("c-1").unwrap();

        let kinds: Vec<DomainEventKind> = audit.recent(10).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DomainEventKind::ApprovalRequested,
                DomainEventKind::ApprovalGranted
            ]
        );
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let mut rule = write_file_rule();
        rule.subject_pattern = "([".into();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ApprovalStore::new(dir.path()).unwrap());
        let bus = Arc::new(EventBus::new());
        let result = ApprovalManager::new(&config_with_rules(vec![rule]), store, bus);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
