//! Domain event bus with metrics and audit subscribers.
//!
//! Components publish events (approval lifecycle, plan lifecycle,
//! subtask outcomes); subscribers consume them in-process. The bus is
//! write-once at startup: subscribers register during bootstrap, then
//! the set is only read.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventKind {
    MessageReceived,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalRejected,
    PlanCreated,
    PlanApproved,
    PlanRejected,
    PlanCompleted,
    PlanFailed,
    PlanCancelled,
    SubtaskStarted,
    SubtaskCompleted,
    SubtaskFailed,
    AgentSwitched,
}

impl DomainEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventKind::MessageReceived => "message_received",
            DomainEventKind::ApprovalRequested => "approval_requested",
            DomainEventKind::ApprovalGranted => "approval_granted",
            DomainEventKind::ApprovalRejected => "approval_rejected",
            DomainEventKind::PlanCreated => "plan_created",
            DomainEventKind::PlanApproved => "plan_approved",
            DomainEventKind::PlanRejected => "plan_rejected",
            DomainEventKind::PlanCompleted => "plan_completed",
            DomainEventKind::PlanFailed => "plan_failed",
            DomainEventKind::PlanCancelled => "plan_cancelled",
            DomainEventKind::SubtaskStarted => "subtask_started",
            DomainEventKind::SubtaskCompleted => "subtask_completed",
            DomainEventKind::SubtaskFailed => "subtask_failed",
            DomainEventKind::AgentSwitched => "agent_switched",
        }
    }
}

/// One published fact: what happened, to which entity, in which session.
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    pub kind: DomainEventKind,
    pub session_id: String,
    /// Request id, plan id, subtask id; whatever identifies the entity.
    pub entity_id: String,
    /// Tool name, plan goal, agent tag.
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        kind: DomainEventKind,
        session_id: impl Into<String>,
        entity_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            entity_id: entity_id.into(),
            subject: subject.into(),
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &DomainEvent);
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn publish(&self, event: DomainEvent) {
        tracing::debug!(
            kind = event.kind.as_str(),
            session_id = %event.session_id,
            entity_id = %event.entity_id,
            "domain event"
        );
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics subscriber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetrics {
    pub events_total: u64,
    pub by_kind: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Per-session and global counters fed by the bus.
#[derive(Default)]
pub struct MetricsCollector {
    global: Mutex<SessionMetrics>,
    sessions: Mutex<HashMap<String, SessionMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&self) -> SessionMetrics {
        self.global.lock().clone()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionMetrics> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn sessions(&self) -> HashMap<String, SessionMetrics> {
        self.sessions.lock().clone()
    }

    fn bump(metrics: &mut SessionMetrics, event: &DomainEvent) {
        metrics.events_total += 1;
        *metrics
            .by_kind
            .entry(event.kind.as_str().to_string())
            .or_insert(0) += 1;
        metrics.last_event_at = Some(event.occurred_at);
    }
}

impl EventSubscriber for MetricsCollector {
    fn on_event(&self, event: &DomainEvent) {
        Self::bump(&mut self.global.lock(), event);
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(event.session_id.clone()).or_default();
        Self::bump(entry, event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit subscriber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded in-memory audit trail, newest last.
pub struct AuditLog {
    entries: Mutex<Vec<DomainEvent>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<DomainEvent> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl EventSubscriber for AuditLog {
    fn on_event(&self, event: &DomainEvent) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            let overflow = entries.len() + 1 - self.capacity;
            entries.drain(..overflow);
        }
        entries.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: DomainEventKind, session: &str) -> DomainEvent {
        DomainEvent::new(kind, session, "e-1", "subject")
    }

    #[test]
    fn bus_fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let metrics = Arc::new(MetricsCollector::new());
        let audit = Arc::new(AuditLog::new(10));
        bus.subscribe(metrics.clone());
        bus.subscribe(audit.clone());

        bus.publish(event(DomainEventKind::ApprovalRequested, "s-1"));

        assert_eq!(metrics.global().events_total, 1);
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn metrics_track_per_session_counts() {
        let metrics = MetricsCollector::new();
        metrics.on_event(&event(DomainEventKind::PlanCreated, "s-1"));
        metrics.on_event(&event(DomainEventKind::PlanCreated, "s-1"));
        metrics.on_event(&event(DomainEventKind::PlanApproved, "s-2"));

        let s1 = metrics.session("s-1").unwrap();
        assert_eq!(s1.events_total, 2);
        assert_eq!(s1.by_kind.get("plan_created"), Some(&2));
        assert_eq!(metrics.global().events_total, 3);
        assert!(metrics.session("s-3").is_none());
    }

    #[test]
    fn audit_log_caps_capacity_dropping_oldest() {
        let audit = AuditLog::new(3);
        for i in 0..5 {
            let mut ev = event(DomainEventKind::SubtaskCompleted, "s-1");
            ev.entity_id = format!("e-{i}");
            audit.on_event(&ev);
        }
        let recent = audit.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].entity_id, "e-2");
        assert_eq!(recent[2].entity_id, "e-4");
    }

    #[test]
    fn recent_limits_results() {
        let audit = AuditLog::new(10);
        for _ in 0..5 {
            audit.on_event(&event(DomainEventKind::SubtaskStarted, "s-1"));
        }
        assert_eq!(audit.recent(2).len(), 2);
    }
}
