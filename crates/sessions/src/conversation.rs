//! Conversation entity: the ordered message history of one session, plus
//! the immutable snapshots used to isolate subtask execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ens_domain::error::{Error, Result};
use ens_domain::message::{Message, Role, ToolCall};

/// Ordered message history for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// Active agent tag for the session (orchestrator by default).
    pub active_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            active_agent: "orchestrator".into(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message, enforcing the tool-binding invariant: a `tool`
    /// message must answer a tool call declared by an earlier assistant
    /// message. Appending an unbound tool result would corrupt the LLM
    /// context, so it is rejected here rather than at the provider.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                Error::Validation("tool message requires tool_call_id".into())
            })?;
            if !self.has_declared_tool_call(call_id) {
                return Err(Error::Validation(format!(
                    "tool message references unknown tool_call_id {call_id}"
                )));
            }
        }
        self.messages.push(message);
        self.last_activity = Utc::now();
        Ok(())
    }

    /// True when some earlier assistant message declared `call_id`.
    pub fn has_declared_tool_call(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .any(|tc| tc.call_id == call_id)
    }

    /// The declared tool call for `call_id`, if any.
    pub fn find_tool_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .find(|tc| tc.call_id == call_id)
    }

    /// True when `call_id` is declared but not yet answered by a tool
    /// message.
    pub fn tool_call_unanswered(&self, call_id: &str) -> bool {
        self.has_declared_tool_call(call_id)
            && !self
                .messages
                .iter()
                .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }

    /// The last assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

/// Immutable copy of a conversation's message list at a point in time.
///
/// Owned by the session that created it; discarded on restore or when the
/// plan terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub snapshot_id: String,
    pub session_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::message::Message;

    #[test]
    fn append_plain_messages() {
        let mut conv = Conversation::new("s-1");
        conv.append(Message::user("hello")).unwrap();
        conv.append(Message::assistant("hi")).unwrap();
        assert_eq!(conv.messages.len(), 2);
    }

    #[test]
    fn tool_message_requires_declared_call() {
        let mut conv = Conversation::new("s-1");
        let err = conv
            .append(Message::tool_result("c-1", "read_file", "data"))
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool_call_id"));
    }

    #[test]
    fn tool_message_binds_to_declared_call() {
        let mut conv = Conversation::new("s-1");
        conv.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                call_id: "c-1".into(),
                tool_name: "read_file".into(),
                arguments: serde_json::json!({}),
            }],
        ))
        .unwrap();

        assert!(conv.tool_call_unanswered("c-1"));
        conv.append(Message::tool_result("c-1", "read_file", "data"))
            .unwrap();
        assert!(!conv.tool_call_unanswered("c-1"));
    }

    #[test]
    fn tool_message_without_binding_field_rejected() {
        let mut conv = Conversation::new("s-1");
        let mut msg = Message::user("x");
        msg.role = Role::Tool;
        assert!(conv.append(msg).is_err());
    }

    #[test]
    fn find_tool_call_returns_declaration() {
        let mut conv = Conversation::new("s-1");
        conv.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                call_id: "c-2".into(),
                tool_name: "write_file".into(),
                arguments: serde_json::json!({"path": "a.py"}),
            }],
        ))
        .unwrap();

        let tc = conv.find_tool_call("c-2").unwrap();
        assert_eq!(tc.tool_name, "write_file");
        assert!(conv.find_tool_call("c-404").is_none());
    }
}
