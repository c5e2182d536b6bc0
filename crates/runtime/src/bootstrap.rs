//! AppState construction extracted from `main.rs`, shared with the
//! integration tests so they boot the same wiring as the server.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use ens_domain::agent::AgentKind;
use ens_domain::config::{Config, ConfigSeverity};
use ens_providers::{FakeProvider, LiteLlmProvider, LlmProvider};
use ens_sessions::uow::CommitMetrics;
use ens_sessions::{ApprovalStore, ConversationStore, PlanStore};

use crate::agents::{AgentRegistry, ArchitectAgent, WorkerAgent};
use crate::runtime::approval::ApprovalManager;
use crate::runtime::classify::TaskClassifier;
use crate::runtime::dedupe::RequestDeduplicator;
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::events::{AuditLog, EventBus, MetricsCollector};
use crate::runtime::fsm::FsmOrchestrator;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Capacity of the in-memory audit trail.
const AUDIT_CAPACITY: usize = 1000;

/// Build the specialist registry for a provider.
pub fn build_agent_registry(
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
) -> AgentRegistry {
    let workers: Vec<Arc<dyn crate::agents::Agent>> = vec![
        Arc::new(WorkerAgent::new(
            AgentKind::Orchestrator,
            "routes and coordinates conversational turns",
            provider.clone(),
            None,
            config.clone(),
        )),
        Arc::new(WorkerAgent::new(
            AgentKind::Coder,
            "writes and edits code",
            provider.clone(),
            None,
            config.clone(),
        )),
        Arc::new(WorkerAgent::new(
            AgentKind::Debug,
            "diagnoses failures and proposes fixes",
            provider.clone(),
            None,
            config.clone(),
        )),
        Arc::new(WorkerAgent::new(
            AgentKind::Explain,
            "explains code and concepts",
            provider.clone(),
            None,
            config,
        )),
    ];
    AgentRegistry::new(workers, Arc::new(ArchitectAgent::new(provider)))
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`]. Pass a provider to inject a test double; `None` builds
/// the production adapter from the config.
pub fn build_app_state(
    config: Arc<Config>,
    provider_override: Option<Arc<dyn LlmProvider>>,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let fatal = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if fatal > 0 && provider_override.is_none() {
        anyhow::bail!("config validation failed with {fatal} error(s)");
    }

    // ── Stores ───────────────────────────────────────────────────────
    let state_dir = config.storage.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;
    let conversations =
        Arc::new(ConversationStore::new(&state_dir).context("initializing conversation store")?);
    let plans = Arc::new(PlanStore::new(&state_dir).context("initializing plan store")?);
    let approval_store =
        Arc::new(ApprovalStore::new(&state_dir).context("initializing approval store")?);
    tracing::info!(path = %state_dir.display(), "state stores ready");

    // ── Event bus + subscribers ──────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let metrics = Arc::new(MetricsCollector::new());
    let audit = Arc::new(AuditLog::new(AUDIT_CAPACITY));
    bus.subscribe(metrics.clone());
    bus.subscribe(audit.clone());
    tracing::info!(subscribers = bus.subscriber_count(), "event bus ready");

    // ── LLM provider ─────────────────────────────────────────────────
    let provider: Arc<dyn LlmProvider> = match provider_override {
        Some(provider) => provider,
        None => {
            if config.llm.proxy_url.is_empty() {
                tracing::warn!("no LLM proxy configured; using the scripted fake provider");
                Arc::new(FakeProvider::new())
            } else {
                Arc::new(
                    LiteLlmProvider::from_config(&config.llm)
                        .context("initializing LLM adapter")?,
                )
            }
        }
    };
    tracing::info!(provider = provider.provider_id(), "LLM provider ready");

    // ── Approval manager ─────────────────────────────────────────────
    let approvals = Arc::new(
        ApprovalManager::new(&config.approvals, approval_store.clone(), bus.clone())
            .context("compiling approval policy")?,
    );

    // ── Agents ───────────────────────────────────────────────────────
    let registry = {
        let worker = |kind: AgentKind, description: &str| -> Arc<dyn crate::agents::Agent> {
            Arc::new(
                WorkerAgent::new(kind, description, provider.clone(), None, config.clone())
                    .with_approvals(approvals.clone()),
            )
        };
        Arc::new(AgentRegistry::new(
            vec![
                worker(
                    AgentKind::Orchestrator,
                    "routes and coordinates conversational turns",
                ),
                worker(AgentKind::Coder, "writes and edits code"),
                worker(AgentKind::Debug, "diagnoses failures and proposes fixes"),
                worker(AgentKind::Explain, "explains code and concepts"),
            ],
            Arc::new(ArchitectAgent::new(provider.clone())),
        ))
    };
    tracing::info!(agents = registry.list().len(), "agent registry ready");

    // ── Kernel pieces ────────────────────────────────────────────────
    let fsm = Arc::new(FsmOrchestrator::new());
    let session_locks = Arc::new(SessionLockMap::new());
    let engine = Arc::new(ExecutionEngine::new(&config.execution));
    let classifier = Arc::new(TaskClassifier::new(provider.clone()));
    let dedupe = Arc::new(RequestDeduplicator::new(
        std::time::Duration::from_secs(config.execution.dedupe_ttl_secs),
        config.execution.dedupe_max_entries,
    ));
    tracing::info!("execution kernel ready");

    // ── Internal auth (read once, hash for constant-time compare) ────
    let internal_auth_hash = match &config.gateway.internal_api_key {
        Some(key) if !key.is_empty() => {
            tracing::info!("internal auth enabled");
            Some(Sha256::digest(key.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("internal auth DISABLED; set INTERNAL_API_KEY to enable");
            None
        }
    };

    Ok(AppState {
        config,
        provider,
        registry,
        conversations,
        plans,
        approval_store,
        approvals,
        session_locks,
        fsm,
        engine,
        classifier,
        dedupe,
        bus,
        metrics,
        audit,
        commit_metrics: Arc::new(CommitMetrics::new()),
        internal_auth_hash,
    })
}

/// Spawn the long-running housekeeping tasks (lock pruning, approval
/// cleanup). Call after [`build_app_state`] when running the server.
pub fn spawn_background_tasks(state: &AppState) {
    {
        let session_locks = state.session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                session_locks.prune_idle();
            }
        });
    }

    {
        let approval_store = state.approval_store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let removed = approval_store.cleanup_resolved(chrono::Duration::hours(24));
                if removed > 0 {
                    tracing::info!(removed, "cleaned up resolved approvals");
                }
            }
        });
    }

    // Conversation TTL sweep, when enabled.
    if state.config.storage.session_ttl_secs > 0 {
        let conversations = state.conversations.clone();
        let fsm = state.fsm.clone();
        let ttl = chrono::Duration::seconds(state.config.storage.session_ttl_secs as i64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let removed = conversations.prune_idle(ttl);
                for session_id in &removed {
                    fsm.remove(session_id);
                }
                if !removed.is_empty() {
                    tracing::info!(removed = removed.len(), "expired idle conversations");
                }
            }
        });
    }

    tracing::info!("background tasks spawned");
}
