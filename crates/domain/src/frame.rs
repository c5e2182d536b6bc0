use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decision on a single gated tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlDecision {
    Approve,
    Reject,
    Edit,
}

/// Decision on a whole drafted plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanDecision {
    Approve,
    Reject,
    Modify,
}

/// Inbound client frames, decoded by the `type` discriminator.
///
/// Unknown tags are a validation error; the decoder never guesses. The
/// same shape travels the WebSocket (client to gateway) and the runtime
/// streaming endpoint body (gateway to runtime).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "user_message")]
    UserMessage {
        content: String,
        #[serde(default = "default_role")]
        role: String,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "switch_agent")]
    SwitchAgent {
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    #[serde(rename = "hitl_decision")]
    HitlDecision {
        call_id: String,
        decision: HitlDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_arguments: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },

    #[serde(rename = "plan_decision")]
    PlanDecision {
        approval_request_id: String,
        decision: PlanDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

fn default_role() -> String {
    "user".into()
}

impl ClientFrame {
    /// Parse and validate a raw JSON frame.
    ///
    /// Beyond serde decoding this checks the semantic constraints that a
    /// schema cannot express: a tool result must carry exactly one of
    /// `result` / `error`, and text payloads must be non-empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| Error::Validation(format!("invalid JSON: {e}")))?;

        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::Validation("message type is required".into()))?;

        let frame: ClientFrame = serde_json::from_value(value.clone()).map_err(|e| {
            // plan_decision with a call_id is a common client slip; spell
            // out what the frame actually needs.
            if tag == "plan_decision" && value.get("call_id").is_some() {
                Error::Validation(
                    "plan_decision requires 'approval_request_id' and 'decision' fields, \
                     not 'call_id'"
                        .into(),
                )
            } else {
                Error::Validation(format!("invalid {tag} frame: {e}"))
            }
        })?;

        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<()> {
        match self {
            ClientFrame::UserMessage { content, .. } if content.trim().is_empty() => {
                Err(Error::Validation("user_message content cannot be empty".into()))
            }
            ClientFrame::ToolResult { result, error, .. } => match (result, error) {
                (None, None) => Err(Error::Validation(
                    "tool_result requires either 'result' or 'error'".into(),
                )),
                (Some(_), Some(_)) => Err(Error::Validation(
                    "tool_result cannot carry both 'result' and 'error'".into(),
                )),
                _ => Ok(()),
            },
            ClientFrame::SwitchAgent { agent_type, .. } if agent_type.trim().is_empty() => {
                Err(Error::Validation("switch_agent requires 'agent_type'".into()))
            }
            _ => Ok(()),
        }
    }

    /// The discriminator tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::UserMessage { .. } => "user_message",
            ClientFrame::ToolResult { .. } => "tool_result",
            ClientFrame::SwitchAgent { .. } => "switch_agent",
            ClientFrame::HitlDecision { .. } => "hitl_decision",
            ClientFrame::PlanDecision { .. } => "plan_decision",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_message() {
        let frame = ClientFrame::parse(r#"{"type":"user_message","content":"Echo hi","role":"user"}"#)
            .unwrap();
        match frame {
            ClientFrame::UserMessage { content, role } => {
                assert_eq!(content, "Echo hi");
                assert_eq!(role, "user");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn role_defaults_to_user() {
        let frame = ClientFrame::parse(r#"{"type":"user_message","content":"hi"}"#).unwrap();
        match frame {
            ClientFrame::UserMessage { role, .. } => assert_eq!(role, "user"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = ClientFrame::parse(r#"{"type":"telepathy","content":"hi"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_missing_tag() {
        let err = ClientFrame::parse(r#"{"content":"hi"}"#).unwrap_err();
        assert!(err.to_string().contains("type is required"));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = ClientFrame::parse("{nope").unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn tool_result_requires_result_or_error() {
        let err = ClientFrame::parse(r#"{"type":"tool_result","call_id":"c-1"}"#).unwrap_err();
        assert!(err.to_string().contains("either"));

        let err = ClientFrame::parse(
            r#"{"type":"tool_result","call_id":"c-1","result":"ok","error":"bad"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("both"));

        assert!(ClientFrame::parse(r#"{"type":"tool_result","call_id":"c-1","result":"ok"}"#).is_ok());
    }

    #[test]
    fn plan_decision_with_call_id_gets_specific_error() {
        let err =
            ClientFrame::parse(r#"{"type":"plan_decision","call_id":"c-1","decision":"approve"}"#)
                .unwrap_err();
        assert!(err.to_string().contains("approval_request_id"));
    }

    #[test]
    fn hitl_decision_parses_all_decisions() {
        for (raw, expected) in [
            ("approve", HitlDecision::Approve),
            ("reject", HitlDecision::Reject),
            ("edit", HitlDecision::Edit),
        ] {
            let frame = ClientFrame::parse(&format!(
                r#"{{"type":"hitl_decision","call_id":"c-1","decision":"{raw}"}}"#
            ))
            .unwrap();
            match frame {
                ClientFrame::HitlDecision { decision, .. } => assert_eq!(decision, expected),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_user_message_rejected() {
        let err = ClientFrame::parse(r#"{"type":"user_message","content":"  "}"#).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
