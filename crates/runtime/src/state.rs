use std::sync::Arc;

use ens_domain::config::Config;
use ens_providers::LlmProvider;
use ens_sessions::uow::CommitMetrics;
use ens_sessions::{ApprovalStore, ConversationStore, PlanStore, UnitOfWork};

use crate::agents::AgentRegistry;
use crate::runtime::approval::ApprovalManager;
use crate::runtime::classify::TaskClassifier;
use crate::runtime::dedupe::RequestDeduplicator;
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::events::{AuditLog, EventBus, MetricsCollector};
use crate::runtime::fsm::FsmOrchestrator;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** -- config, LLM provider, agents
/// - **Session state** -- conversations, plans, approvals, locks
/// - **Kernel** -- FSM, engine, classifier, dedupe
/// - **Observability** -- event bus, metrics, audit, commit metrics
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<AgentRegistry>,

    // ── Session state ─────────────────────────────────────────────────
    pub conversations: Arc<ConversationStore>,
    pub plans: Arc<PlanStore>,
    pub approval_store: Arc<ApprovalStore>,
    pub approvals: Arc<ApprovalManager>,
    pub session_locks: Arc<SessionLockMap>,

    // ── Kernel ────────────────────────────────────────────────────────
    pub fsm: Arc<FsmOrchestrator>,
    pub engine: Arc<ExecutionEngine>,
    pub classifier: Arc<TaskClassifier>,
    pub dedupe: Arc<RequestDeduplicator>,

    // ── Observability ─────────────────────────────────────────────────
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsCollector>,
    pub audit: Arc<AuditLog>,
    pub commit_metrics: Arc<CommitMetrics>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the internal API key. `None` = auth disabled.
    pub internal_auth_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Open a unit-of-work scope over the session-state repositories.
    pub fn new_uow(&self) -> UnitOfWork {
        UnitOfWork::new(
            self.conversations.clone(),
            self.plans.clone(),
            self.approval_store.clone(),
            self.commit_metrics.clone(),
        )
    }
}
