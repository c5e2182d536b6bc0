use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Tags identifying the specialist agents.
///
/// The architect only drafts plans; assigning it a subtask is rejected by
/// the plan entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Routes and coordinates; the default conversational agent.
    Orchestrator,
    /// Writes and edits code.
    Coder,
    /// Decomposes complex tasks into plans.
    Architect,
    /// Diagnoses failures.
    Debug,
    /// Explains code and concepts.
    Explain,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Orchestrator,
        AgentKind::Coder,
        AgentKind::Architect,
        AgentKind::Debug,
        AgentKind::Explain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Orchestrator => "orchestrator",
            AgentKind::Coder => "coder",
            AgentKind::Architect => "architect",
            AgentKind::Debug => "debug",
            AgentKind::Explain => "explain",
        }
    }

    /// Parse a wire tag. Accepts the common aliases clients send.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orchestrator" => Ok(AgentKind::Orchestrator),
            "coder" | "code" => Ok(AgentKind::Coder),
            "architect" | "plan" | "planner" => Ok(AgentKind::Architect),
            "debug" | "debugger" => Ok(AgentKind::Debug),
            "explain" | "explainer" => Ok(AgentKind::Explain),
            other => Err(Error::Validation(format!("unknown agent type: {other}"))),
        }
    }

    /// Whether this agent may be assigned plan subtasks.
    pub fn can_execute_subtasks(&self) -> bool {
        !matches!(self, AgentKind::Architect)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(AgentKind::parse("code").unwrap(), AgentKind::Coder);
        assert_eq!(AgentKind::parse("plan").unwrap(), AgentKind::Architect);
        assert_eq!(AgentKind::parse("DEBUG").unwrap(), AgentKind::Debug);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(AgentKind::parse("barista").is_err());
    }

    #[test]
    fn architect_cannot_execute_subtasks() {
        assert!(!AgentKind::Architect.can_execute_subtasks());
        assert!(AgentKind::Coder.can_execute_subtasks());
    }

    #[test]
    fn serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&AgentKind::Explain).unwrap();
        assert_eq!(json, "\"explain\"");
    }
}
