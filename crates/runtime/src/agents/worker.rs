//! The shared LLM-driven worker agent.
//!
//! One implementation covers the orchestrator, coder, debug and explain
//! specialists; only the tag and system prompt differ. A turn is a
//! single streaming completion: tokens are forwarded with one-token
//! lookahead (so the last token of a final answer carries
//! `is_final: true`), tool calls are assembled from the stream, gated by
//! the approval policy, declared on the conversation, and then the turn
//! suspends so the client can execute them.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use ens_domain::agent::AgentKind;
use ens_domain::approval::{ApprovalKind, PendingApproval};
use ens_domain::config::Config;
use ens_domain::error::Result;
use ens_domain::event::AgentEvent;
use ens_domain::message::{Message, Role, ToolCall, ToolDefinition};
use ens_providers::{ChatRequest, LlmProvider, StreamEvent};
use ens_sessions::UnitOfWork;

use crate::runtime::approval::ApprovalManager;

use super::{Agent, AgentInvocation, TurnOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts & tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn base_prompt(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Orchestrator => {
            "You are the orchestrator agent: a capable general assistant for \
             software engineering sessions. Answer directly, and use tools when \
             the task needs them."
        }
        AgentKind::Coder => {
            "You are the coding agent. Write and edit code precisely. Prefer \
             small, correct changes; use the file tools to apply them."
        }
        AgentKind::Debug => {
            "You are the debugging agent. Diagnose failures from the evidence, \
             state the root cause, and propose the fix. Use tools to inspect \
             files and run commands when needed."
        }
        AgentKind::Explain => {
            "You are the explanation agent. Explain code and concepts clearly \
             and concretely, at the level of the question."
        }
        // The architect never runs as a worker; keep a harmless prompt so
        // the match stays total.
        AgentKind::Architect => "You draft plans.",
    }
}

/// Client-executed tools advertised to the model. Execution happens on
/// the other side of the stream; the runtime only declares and gates.
fn tool_definitions() -> Vec<ToolDefinition> {
    fn schema(props: serde_json::Value, required: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
        })
    }

    vec![
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a file from the workspace".into(),
            parameters: schema(
                serde_json::json!({"path": {"type": "string"}}),
                &["path"],
            ),
        },
        ToolDefinition {
            name: "write_file".into(),
            description: "Create or overwrite a file in the workspace".into(),
            parameters: schema(
                serde_json::json!({
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                }),
                &["path", "content"],
            ),
        },
        ToolDefinition {
            name: "run_command".into(),
            description: "Run a shell command in the workspace".into(),
            parameters: schema(
                serde_json::json!({"command": {"type": "string"}}),
                &["command"],
            ),
        },
        ToolDefinition {
            name: "search_code".into(),
            description: "Search the workspace for a pattern".into(),
            parameters: schema(
                serde_json::json!({"pattern": {"type": "string"}}),
                &["pattern"],
            ),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collects tool calls from the event stream, in arrival order.
///
/// The adapter keys every delta by the real call id and normally ends
/// each call with an authoritative finish event carrying the parsed
/// arguments. The open/extend bookkeeping covers a stream that ends
/// before a finish event: those calls are assembled from their
/// accumulated fragments in [`ToolCallBuffer::into_calls`].
#[derive(Default)]
struct ToolCallBuffer {
    /// Opened but not yet finished: (call_id, tool_name, raw args json).
    open: Vec<(String, String, String)>,
    finished: Vec<ToolCall>,
}

impl ToolCallBuffer {
    fn open(&mut self, call_id: String, tool_name: String) {
        self.open.push((call_id, tool_name, String::new()));
    }

    fn extend_arguments(&mut self, call_id: &str, delta: &str) {
        match self.open.iter_mut().find(|(id, _, _)| id == call_id) {
            Some((_, _, args)) => args.push_str(delta),
            None => {
                tracing::warn!(call_id = %call_id, "argument delta for an unopened tool call");
            }
        }
    }

    /// An authoritative finish supersedes whatever was accumulated.
    fn finish(&mut self, call: ToolCall) {
        self.open.retain(|(id, _, _)| id != &call.call_id);
        self.finished.push(call);
    }

    /// Every collected call; unfinished ones are parsed from their
    /// fragments, with unparseable arguments degraded to an empty object.
    fn into_calls(mut self) -> Vec<ToolCall> {
        for (call_id, tool_name, args) in self.open.drain(..) {
            let arguments = if args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                match serde_json::from_str(&args) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            call_id = %call_id,
                            tool = %tool_name,
                            error = %e,
                            "unfinished tool call arguments are not valid JSON"
                        );
                        serde_json::Value::Object(Default::default())
                    }
                }
            };
            self.finished.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
        self.finished
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkerAgent {
    kind: AgentKind,
    description: String,
    provider: Arc<dyn LlmProvider>,
    approvals: Option<Arc<ApprovalManager>>,
    config: Arc<Config>,
}

/// Commit a micro-transaction without aborting the stream on failure.
/// The append stays in memory; a later commit (or the scope exit) gets
/// another chance at durability.
fn commit_soft(uow: &mut UnitOfWork, operation: &str) {
    if let Err(e) = uow.commit(operation) {
        tracing::error!(operation = operation, error = %e, "micro-commit failed; stream continues");
    }
}

impl WorkerAgent {
    pub fn new(
        kind: AgentKind,
        description: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        approvals: Option<Arc<ApprovalManager>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            provider,
            approvals,
            config,
        }
    }

    /// Late binding for the approval manager (it needs the event bus,
    /// which is wired after the agents in bootstrap).
    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    fn system_prompt(&self, context: &serde_json::Value) -> String {
        let mut prompt = base_prompt(self.kind).to_string();

        if context.get("execution_mode").and_then(|v| v.as_str()) == Some("subtask") {
            if let Some(goal) = context.get("plan_goal").and_then(|v| v.as_str()) {
                prompt.push_str(&format!(
                    "\n\nYou are executing one subtask of a larger approved plan.\n\
                     Overall goal: {goal}\n\
                     Complete only your assigned subtask."
                ));
            }
        }
        prompt
    }

    /// Count of assistant tool-call rounds since the last user message.
    fn tool_rounds_since_user(history: &[Message]) -> usize {
        history
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .filter(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            .count()
    }
}

#[async_trait::async_trait]
impl Agent for WorkerAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn process(
        &self,
        inv: AgentInvocation<'_>,
        uow: &mut UnitOfWork,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutcome> {
        let session_id = inv.session_id;

        // ── Persist the new user message, if any ────────────────────
        if let Some(message) = inv.message {
            uow.conversations
                .append_message(session_id, Message::user(message))?;
            uow.mark_conversation(session_id);
            commit_soft(uow, "save_user_message");
        }

        let history = uow.conversations.get_history(session_id)?;

        // Runaway guard: too many tool rounds without user input.
        let max_loops = self.config.execution.max_tool_loops;
        if Self::tool_rounds_since_user(&history) >= max_loops {
            let msg = format!("tool loop limit reached ({max_loops} rounds)");
            let _ = tx.send(AgentEvent::fatal(&msg)).await;
            return Ok(TurnOutcome::Failed(msg));
        }

        // ── Stream the completion ───────────────────────────────────
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt(&inv.context)));
        messages.extend(history);

        let req = ChatRequest {
            messages,
            tools: tool_definitions(),
            temperature: Some(self.config.llm.temperature),
            max_tokens: None,
            json_mode: false,
            model: None,
        };

        let mut stream = self.provider.chat_stream(&req).await?;

        let mut text_buf = String::new();
        let mut held_token: Option<String> = None;
        let mut calls = ToolCallBuffer::default();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    text_buf.push_str(&text);
                    if let Some(prev) = held_token.replace(text) {
                        let _ = tx
                            .send(AgentEvent::AssistantMessage {
                                token: prev,
                                is_final: false,
                                metadata: None,
                            })
                            .await;
                    }
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    calls.open(call_id, tool_name);
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    calls.extend_arguments(&call_id, &delta);
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    calls.finish(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done { .. } => {}
                StreamEvent::Error { message } => {
                    let _ = tx
                        .send(AgentEvent::Error {
                            error: message.clone(),
                            is_final: None,
                            metadata: None,
                        })
                        .await;
                    return Ok(TurnOutcome::Failed(message));
                }
            }
        }

        let pending_tool_calls = calls.into_calls();

        // ── Final answer path ───────────────────────────────────────
        if pending_tool_calls.is_empty() {
            uow.conversations
                .append_message(session_id, Message::assistant(&text_buf))?;
            uow.mark_conversation(session_id);
            commit_soft(uow, "save_assistant_message");

            let _ = tx
                .send(AgentEvent::AssistantMessage {
                    token: held_token.unwrap_or_default(),
                    is_final: true,
                    metadata: None,
                })
                .await;
            return Ok(TurnOutcome::Final(text_buf));
        }

        // ── Tool call path: declare, gate, suspend ──────────────────
        if let Some(prev) = held_token.take() {
            let _ = tx
                .send(AgentEvent::AssistantMessage {
                    token: prev,
                    is_final: false,
                    metadata: None,
                })
                .await;
        }

        uow.conversations.append_message(
            session_id,
            Message::assistant_with_tool_calls(&text_buf, pending_tool_calls.clone()),
        )?;
        uow.mark_conversation(session_id);
        commit_soft(uow, "declare_tool_calls");

        let mut awaiting_approval = false;
        for tc in &pending_tool_calls {
            let (requires, reason) = match &self.approvals {
                Some(approvals) => approvals.should_require_approval(
                    ApprovalKind::Tool,
                    &tc.tool_name,
                    &tc.arguments,
                ),
                None => (false, None),
            };

            let _ = tx
                .send(AgentEvent::ToolCall {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                    requires_approval: Some(requires),
                })
                .await;

            if requires {
                awaiting_approval = true;
                let reason_text =
                    reason.unwrap_or_else(|| "Approval required by policy".into());
                if let Some(approvals) = &self.approvals {
                    approvals.add_pending(PendingApproval::new(
                        tc.call_id.clone(),
                        ApprovalKind::Tool,
                        tc.tool_name.clone(),
                        session_id,
                        tc.arguments.clone(),
                        Some(reason_text.clone()),
                    ))?;
                    uow.mark_approvals();
                    commit_soft(uow, "add_pending_approval");
                }
                let _ = tx
                    .send(AgentEvent::ToolApprovalRequired {
                        call_id: tc.call_id.clone(),
                        tool_name: tc.tool_name.clone(),
                        arguments: tc.arguments.clone(),
                        reason: reason_text,
                    })
                    .await;
            }
        }

        Ok(TurnOutcome::Suspended { awaiting_approval })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::config::ApprovalsConfig;
    use ens_providers::{FakeProvider, ScriptedResponse};
    use ens_sessions::{ApprovalStore, ConversationStore, PlanStore};
    use ens_sessions::uow::CommitMetrics;

    struct Fixture {
        _dir: tempfile::TempDir,
        conversations: Arc<ConversationStore>,
        plans: Arc<PlanStore>,
        approvals_store: Arc<ApprovalStore>,
        metrics: Arc<CommitMetrics>,
        provider: Arc<FakeProvider>,
        manager: Arc<ApprovalManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let approvals_store = Arc::new(ApprovalStore::new(dir.path()).unwrap());
            let bus = Arc::new(crate::runtime::events::EventBus::new());
            let manager = Arc::new(
                ApprovalManager::new(&ApprovalsConfig::default(), approvals_store.clone(), bus)
                    .unwrap(),
            );
            Self {
                conversations: Arc::new(ConversationStore::new(dir.path()).unwrap()),
                plans: Arc::new(PlanStore::new(dir.path()).unwrap()),
                approvals_store,
                metrics: Arc::new(CommitMetrics::new()),
                provider: Arc::new(FakeProvider::new()),
                manager,
                _dir: dir,
            }
        }

        fn worker(&self) -> WorkerAgent {
            WorkerAgent::new(
                AgentKind::Coder,
                "writes code",
                self.provider.clone(),
                Some(self.manager.clone()),
                Arc::new(Config::default()),
            )
        }

        fn uow(&self) -> UnitOfWork {
            UnitOfWork::new(
                self.conversations.clone(),
                self.plans.clone(),
                self.approvals_store.clone(),
                self.metrics.clone(),
            )
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn final_answer_streams_tokens_with_final_marker() {
        let fx = Fixture::new();
        fx.provider
            .enqueue(ScriptedResponse::with_tokens(&["Hi", " there", "."]));
        fx.conversations.get_or_create("s-1");

        let (tx, mut rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        let outcome = fx
            .worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: Some("Echo hi"),
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap();
        uow.finish("test").unwrap();

        assert_eq!(outcome, TurnOutcome::Final("Hi there.".into()));

        let events = drain(&mut rx).await;
        let tokens: Vec<(String, bool)> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::AssistantMessage {
                    token, is_final, ..
                } => Some((token.clone(), *is_final)),
                _ => None,
            })
            .collect();
        assert_eq!(
            tokens,
            vec![
                ("Hi".into(), false),
                (" there".into(), false),
                (".".into(), true)
            ]
        );

        // User + assistant messages persisted.
        let history = fx.conversations.get_history("s-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hi there.");
    }

    #[tokio::test]
    async fn gated_tool_call_suspends_with_approval_request() {
        let fx = Fixture::new();
        fx.provider.enqueue(ScriptedResponse::tool_call(
            "c-9",
            "write_file",
            serde_json::json!({"path": "a.py", "content": "pass"}),
        ));
        fx.conversations.get_or_create("s-1");

        let (tx, mut rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        let outcome = fx
            .worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: Some("write a.py"),
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap();
        uow.finish("test").unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Suspended {
                awaiting_approval: true
            }
        );

        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCall {
                requires_approval: Some(true),
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolApprovalRequired { call_id, .. } if call_id == "c-9")));

        // Approval persisted, tool call declared on the conversation.
        assert!(fx.manager.get_pending("c-9").is_some());
        let history = fx.conversations.get_history("s-1").unwrap();
        assert_eq!(history[1].tool_calls[0].call_id, "c-9");
    }

    #[tokio::test]
    async fn ungated_tool_call_suspends_without_approval() {
        let fx = Fixture::new();
        fx.provider.enqueue(ScriptedResponse::tool_call(
            "c-1",
            "read_file",
            serde_json::json!({"path": "a.py"}),
        ));
        fx.conversations.get_or_create("s-1");

        let (tx, mut rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        let outcome = fx
            .worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: Some("read a.py"),
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap();
        uow.finish("test").unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Suspended {
                awaiting_approval: false
            }
        );
        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCall {
                requires_approval: Some(false),
                ..
            }
        )));
        assert!(fx.manager.get_pending("c-1").is_none());
    }

    #[tokio::test]
    async fn continuation_does_not_append_user_message() {
        let fx = Fixture::new();
        fx.provider.enqueue(ScriptedResponse::text("done"));
        fx.conversations.get_or_create("s-1");
        fx.conversations
            .append_message("s-1", Message::user("earlier"))
            .unwrap();

        let (tx, _rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        fx.worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: None,
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap();
        uow.finish("test").unwrap();

        let history = fx.conversations.get_history("s-1").unwrap();
        let users = history.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(users, 1);
    }

    #[tokio::test]
    async fn provider_failure_at_stream_start_propagates() {
        let fx = Fixture::new();
        // An empty scripted queue makes chat_stream fail at call time;
        // the error propagates so the caller can emit the terminal event.
        fx.conversations.get_or_create("s-1");

        let (tx, _rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        let err = fx
            .worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: Some("hi"),
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no scripted response"));
        uow.rollback().unwrap();
    }

    #[test]
    fn subtask_context_lands_in_prompt() {
        let fx = Fixture::new();
        let worker = fx.worker();
        let prompt = worker.system_prompt(&serde_json::json!({
            "execution_mode": "subtask",
            "plan_goal": "Build login screen",
        }));
        assert!(prompt.contains("Build login screen"));
        assert!(prompt.contains("subtask"));
    }

    // ── ToolCallBuffer ─────────────────────────────────────────────

    #[test]
    fn buffer_assembles_unfinished_call_from_deltas() {
        let mut buffer = ToolCallBuffer::default();
        buffer.open("c-1".into(), "write_file".into());
        buffer.extend_arguments("c-1", "{\"path\":");
        buffer.extend_arguments("c-1", "\"a.py\"}");

        let calls = buffer.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "c-1");
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "a.py"}));
    }

    #[test]
    fn buffer_finish_supersedes_accumulated_fragments() {
        let mut buffer = ToolCallBuffer::default();
        buffer.open("c-1".into(), "write_file".into());
        buffer.extend_arguments("c-1", "{\"partial\":");
        buffer.finish(ToolCall {
            call_id: "c-1".into(),
            tool_name: "write_file".into(),
            arguments: serde_json::json!({"path": "b.py"}),
        });

        let calls = buffer.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "b.py"}));
    }

    #[test]
    fn buffer_degrades_broken_fragments_to_empty_object() {
        let mut buffer = ToolCallBuffer::default();
        buffer.open("c-1".into(), "write_file".into());
        buffer.extend_arguments("c-1", "{broken");

        let calls = buffer.into_calls();
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn buffer_ignores_delta_for_unopened_call() {
        let mut buffer = ToolCallBuffer::default();
        buffer.extend_arguments("c-ghost", "{\"x\":1}");
        assert!(buffer.into_calls().is_empty());
    }

    #[tokio::test]
    async fn started_plus_deltas_without_finish_assembles_arguments() {
        let fx = Fixture::new();
        fx.provider.enqueue(ScriptedResponse::streamed_tool_call(
            "c-7",
            "write_file",
            &["{\"path\":\"a.py\",", "\"content\":\"pass\"}"],
        ));
        fx.conversations.get_or_create("s-1");

        let (tx, mut rx) = mpsc::channel(64);
        let mut uow = fx.uow();
        let outcome = fx
            .worker()
            .process(
                AgentInvocation {
                    session_id: "s-1",
                    message: Some("write a.py"),
                    context: serde_json::json!({}),
                },
                &mut uow,
                &tx,
            )
            .await
            .unwrap();
        uow.finish("test").unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Suspended {
                awaiting_approval: true
            }
        );

        // The declared call carries the arguments assembled from the
        // fragments, not an empty object.
        let history = fx.conversations.get_history("s-1").unwrap();
        let declared = &history[1].tool_calls[0];
        assert_eq!(declared.call_id, "c-7");
        assert_eq!(
            declared.arguments,
            serde_json::json!({"path": "a.py", "content": "pass"})
        );

        // The approval request sees the same assembled arguments.
        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolApprovalRequired { call_id, arguments, .. }
                if call_id == "c-7" && arguments["path"] == "a.py"
        )));
    }
}
