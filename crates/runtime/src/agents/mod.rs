//! Agents and their process-wide registry.
//!
//! An agent is a capability unit with one streaming operation: it takes
//! a session, an optional new message and a context, drives the LLM, and
//! emits events into the caller's channel. Specialists share one worker
//! implementation parameterized by tag and system prompt; the architect
//! is not a worker (it drafts plans and never executes subtasks), so the
//! registry keeps it outside the dispatch map.

pub mod architect;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use ens_domain::agent::AgentKind;
use ens_domain::error::{Error, Result};
use ens_domain::event::AgentEvent;
use ens_sessions::UnitOfWork;

pub use architect::ArchitectAgent;
pub use worker::WorkerAgent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One call into an agent.
pub struct AgentInvocation<'a> {
    pub session_id: &'a str,
    /// A new user-visible instruction, or `None` to continue from the
    /// existing history (tool-result continuations).
    pub message: Option<&'a str>,
    /// Execution context (plan goal, dependency summaries, mode).
    pub context: serde_json::Value,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The agent produced a final answer.
    Final(String),
    /// The agent emitted tool calls; the stream must end so the client
    /// can execute them (or decide on the gated ones).
    Suspended { awaiting_approval: bool },
    /// The agent reported an error mid-stream.
    Failed(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;
    fn description(&self) -> &str;

    /// Run one streaming turn, emitting events into `tx`.
    async fn process(
        &self,
        inv: AgentInvocation<'_>,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentInfo {
    pub agent_type: String,
    pub description: String,
}

/// Write-once registry built at startup.
pub struct AgentRegistry {
    workers: HashMap<AgentKind, Arc<dyn Agent>>,
    architect: Arc<ArchitectAgent>,
}

impl AgentRegistry {
    pub fn new(workers: Vec<Arc<dyn Agent>>, architect: Arc<ArchitectAgent>) -> Self {
        let workers = workers.into_iter().map(|a| (a.kind(), a)).collect();
        Self { workers, architect }
    }

    /// Look up an executing agent by tag. The architect is deliberately
    /// not dispatchable here.
    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn Agent>> {
        self.workers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::not_found("agent", kind.as_str()))
    }

    pub fn architect(&self) -> Arc<ArchitectAgent> {
        self.architect.clone()
    }

    /// Everything registered, architect included, for the listing API.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .workers
            .values()
            .map(|a| AgentInfo {
                agent_type: a.kind().as_str().into(),
                description: a.description().into(),
            })
            .collect();
        infos.push(AgentInfo {
            agent_type: AgentKind::Architect.as_str().into(),
            description: self.architect.description().into(),
        });
        infos.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_providers::FakeProvider;

    fn registry() -> AgentRegistry {
        let provider: Arc<dyn ens_providers::LlmProvider> = Arc::new(FakeProvider::new());
        crate::bootstrap::build_agent_registry(
            provider,
            Arc::new(ens_domain::config::Config::default()),
        )
    }

    #[test]
    fn workers_are_dispatchable() {
        let registry = registry();
        for kind in [
            AgentKind::Orchestrator,
            AgentKind::Coder,
            AgentKind::Debug,
            AgentKind::Explain,
        ] {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn architect_is_not_dispatchable() {
        let registry = registry();
        assert!(matches!(
            registry.get(AgentKind::Architect),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn list_includes_all_five() {
        let registry = registry();
        let tags: Vec<String> = registry.list().into_iter().map(|i| i.agent_type).collect();
        assert_eq!(
            tags,
            vec!["architect", "coder", "debug", "explain", "orchestrator"]
        );
    }
}
