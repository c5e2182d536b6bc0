use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM and agent event streams.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Stream of agent events as produced by a turn or a plan execution step.
pub type EventStream = BoxStream<'static, AgentEvent>;

/// Events emitted on the outbound stream of a runtime request.
///
/// These are the frames a client ultimately sees: the runtime serializes
/// them as SSE `data:` payloads and the gateway forwards them over the
/// WebSocket verbatim (minus null fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Announces the server-assigned session id. First event of any
    /// stream that created a fresh session.
    #[serde(rename = "session_info")]
    SessionInfo { session_id: String },

    /// An incremental assistant token. `is_final` marks the last token of
    /// a completed assistant message.
    #[serde(rename = "assistant_message")]
    AssistantMessage {
        token: String,
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// The model is invoking a tool. Execution happens on the client; the
    /// stream suspends after this (or after the approval request below).
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        requires_approval: Option<bool>,
    },

    /// Echo of a processed tool result.
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The session's active agent changed.
    #[serde(rename = "agent_switched")]
    AgentSwitched {
        from_agent: String,
        to_agent: String,
        reason: String,
    },

    /// A drafted plan awaits the user's decision.
    #[serde(rename = "plan_approval_required")]
    PlanApprovalRequired {
        approval_request_id: String,
        plan_id: String,
        plan_summary: serde_json::Value,
    },

    /// A gated tool call awaits the user's decision.
    #[serde(rename = "tool_approval_required")]
    ToolApprovalRequired {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        reason: String,
    },

    #[serde(rename = "plan_execution_started")]
    PlanExecutionStarted { plan_id: String },

    #[serde(rename = "plan_execution_rejected")]
    PlanExecutionRejected { plan_id: String },

    /// A subtask ran to completion.
    #[serde(rename = "subtask_completed")]
    SubtaskCompleted {
        subtask_id: String,
        result: String,
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<f64>,
    },

    /// The whole plan finished.
    #[serde(rename = "execution_completed")]
    ExecutionCompleted {
        plan_id: String,
        status: String,
        progress: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<f64>,
    },

    /// Progress note (e.g. "Executing subtask ...").
    #[serde(rename = "status")]
    Status {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// An error. `is_final` marks the terminal event of the stream.
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_final: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
}

impl AgentEvent {
    /// Terminal error event, always stream-ending.
    pub fn fatal(error: impl Into<String>) -> Self {
        AgentEvent::Error {
            error: error.into(),
            is_final: Some(true),
            metadata: None,
        }
    }

    /// True when the event ends its stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            AgentEvent::Error { is_final, .. } => is_final.unwrap_or(false),
            AgentEvent::ExecutionCompleted { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = AgentEvent::SessionInfo {
            session_id: "s-1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "session_info");
        assert_eq!(json["session_id"], "s-1");
    }

    #[test]
    fn assistant_message_skips_absent_metadata() {
        let ev = AgentEvent::AssistantMessage {
            token: "hi".into(),
            is_final: false,
            metadata: None,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn fatal_is_terminal() {
        assert!(AgentEvent::fatal("boom").is_terminal());
        let non_final = AgentEvent::Error {
            error: "soft".into(),
            is_final: None,
            metadata: None,
        };
        assert!(!non_final.is_terminal());
    }

    #[test]
    fn round_trips_through_json() {
        let ev = AgentEvent::ToolCall {
            call_id: "c-9".into(),
            tool_name: "write_file".into(),
            arguments: serde_json::json!({"path": "a.py"}),
            requires_approval: Some(true),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        match back {
            AgentEvent::ToolCall {
                call_id,
                requires_approval,
                ..
            } => {
                assert_eq!(call_id, "c-9");
                assert_eq!(requires_approval, Some(true));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
