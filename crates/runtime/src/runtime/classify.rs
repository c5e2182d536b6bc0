//! Task classification: atomic (route to one specialist) versus complex
//! (route to the architect for decomposition).
//!
//! Classification asks the model for a strict JSON verdict and falls
//! back to keyword heuristics when the backend is unavailable or returns
//! garbage. The routing rule is hard: a non-atomic task goes to the
//! architect. A classification that says otherwise is rejected as
//! invalid, never silently corrected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ens_domain::agent::AgentKind;
use ens_domain::error::{Error, Result};
use ens_domain::message::Message;
use ens_providers::{ChatRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskClassification {
    pub is_atomic: bool,
    pub agent: AgentKind,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TaskClassification {
    /// Fallible constructor enforcing the routing rule.
    pub fn new(
        is_atomic: bool,
        agent: AgentKind,
        confidence: Confidence,
        reasoning: Option<String>,
    ) -> Result<Self> {
        if !is_atomic && agent != AgentKind::Architect {
            return Err(Error::Validation(format!(
                "non-atomic tasks must be assigned to the architect agent, got {agent}"
            )));
        }
        if is_atomic && agent == AgentKind::Architect {
            return Err(Error::Validation(
                "atomic tasks cannot be assigned to the architect agent".into(),
            ));
        }
        Ok(Self {
            is_atomic,
            agent,
            confidence,
            reasoning,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CLASSIFY_PROMPT: &str = r#"You route software-engineering requests to specialist agents.

Decide whether the user's task is ATOMIC (one focused action a single
specialist completes in one go) or COMPLEX (needs decomposition into
multiple steps).

Agents: "coder" (write/edit code), "debug" (diagnose failures),
"explain" (explain code/concepts), "architect" (decompose complex tasks).

Rules:
- is_atomic=false MUST use agent "architect".
- is_atomic=true MUST NOT use agent "architect".

Respond with ONLY a JSON object:
{"is_atomic": bool, "agent": "coder"|"debug"|"explain"|"architect", "confidence": "high"|"medium"|"low", "reasoning": "one sentence"}"#;

pub struct TaskClassifier {
    provider: Arc<dyn LlmProvider>,
}

impl TaskClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Classify a user message.
    ///
    /// Backend failures degrade to keyword heuristics; an invalid verdict
    /// from a healthy backend is an error the caller maps to the FSM
    /// classify-error branch.
    pub async fn classify(&self, message: &str) -> Result<TaskClassification> {
        let req = ChatRequest {
            messages: vec![Message::system(CLASSIFY_PROMPT), Message::user(message)],
            json_mode: true,
            temperature: Some(0.0),
            ..Default::default()
        };

        let raw = match self.provider.chat(&req).await {
            Ok(resp) => resp.content,
            Err(e) => {
                tracing::warn!(error = %e, "classifier backend unavailable, using keywords");
                return Ok(Self::classify_with_keywords(message));
            }
        };

        match Self::parse_verdict(&raw) {
            Ok(classification) => Ok(classification),
            Err(Error::Validation(msg)) => {
                // The model produced structured output that breaks the
                // routing rule. Raising lets the session surface a
                // classify error instead of guessing.
                Err(Error::Validation(msg))
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable classifier output, using keywords");
                Ok(Self::classify_with_keywords(message))
            }
        }
    }

    fn parse_verdict(raw: &str) -> Result<TaskClassification> {
        #[derive(Deserialize)]
        struct Verdict {
            is_atomic: bool,
            agent: String,
            #[serde(default)]
            confidence: Option<String>,
            #[serde(default)]
            reasoning: Option<String>,
        }

        // Tolerate code fences around the JSON object.
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let verdict: Verdict = serde_json::from_str(trimmed)?;
        let agent = AgentKind::parse(&verdict.agent)?;
        let confidence = match verdict.confidence.as_deref() {
            Some("high") => Confidence::High,
            Some("low") => Confidence::Low,
            _ => Confidence::Medium,
        };
        TaskClassification::new(verdict.is_atomic, agent, confidence, verdict.reasoning)
    }

    /// Heuristic fallback. Low confidence by construction.
    pub fn classify_with_keywords(message: &str) -> TaskClassification {
        let lower = message.to_lowercase();

        let complex_markers = [
            " and then ",
            " with tests",
            "refactor the whole",
            "build ",
            "implement ",
            "create a full",
            "end-to-end",
            "migrate ",
        ];
        let step_count = lower.matches(" and ").count() + lower.matches(", then ").count();
        let is_complex = step_count >= 2
            || complex_markers.iter().filter(|m| lower.contains(*m)).count() >= 2
            || (lower.contains("build ") && lower.contains(" with "));

        if is_complex {
            return TaskClassification {
                is_atomic: false,
                agent: AgentKind::Architect,
                confidence: Confidence::Low,
                reasoning: Some("keyword heuristic: multi-step request".into()),
            };
        }

        let agent = if ["debug", "error", "exception", "traceback", "crash", "broken"]
            .iter()
            .any(|k| lower.contains(k))
        {
            AgentKind::Debug
        } else if ["explain", "how does", "what is", "why does", "describe"]
            .iter()
            .any(|k| lower.contains(k))
        {
            AgentKind::Explain
        } else {
            AgentKind::Coder
        };

        TaskClassification {
            is_atomic: true,
            agent,
            confidence: Confidence::Low,
            reasoning: Some("keyword heuristic".into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ens_providers::{FakeProvider, ScriptedResponse};

    #[test]
    fn valid_atomic_classification() {
        let c =
            TaskClassification::new(true, AgentKind::Coder, Confidence::High, None).unwrap();
        assert!(c.is_atomic);
        assert_eq!(c.agent, AgentKind::Coder);
    }

    #[test]
    fn non_atomic_must_be_architect() {
        for agent in [AgentKind::Coder, AgentKind::Debug, AgentKind::Explain] {
            let err =
                TaskClassification::new(false, agent, Confidence::High, None).unwrap_err();
            assert!(err.to_string().contains("architect"));
        }
        assert!(TaskClassification::new(false, AgentKind::Architect, Confidence::High, None).is_ok());
    }

    #[test]
    fn atomic_cannot_be_architect() {
        assert!(TaskClassification::new(true, AgentKind::Architect, Confidence::High, None).is_err());
    }

    #[test]
    fn keywords_route_simple_code_task() {
        let c = TaskClassifier::classify_with_keywords("Update function in login.py");
        assert!(c.is_atomic);
        assert_eq!(c.agent, AgentKind::Coder);
        assert_eq!(c.confidence, Confidence::Low);
    }

    #[test]
    fn keywords_route_debug_task() {
        let c = TaskClassifier::classify_with_keywords("Debug error in authentication");
        assert!(c.is_atomic);
        assert_eq!(c.agent, AgentKind::Debug);
    }

    #[test]
    fn keywords_route_explain_task() {
        let c = TaskClassifier::classify_with_keywords("Explain how JWT works");
        assert!(c.is_atomic);
        assert_eq!(c.agent, AgentKind::Explain);
    }

    #[test]
    fn keywords_route_complex_task_to_architect() {
        let c = TaskClassifier::classify_with_keywords(
            "Build login screen with tests and then wire it to the backend and deploy",
        );
        assert!(!c.is_atomic);
        assert_eq!(c.agent, AgentKind::Architect);
    }

    #[tokio::test]
    async fn llm_verdict_is_parsed() {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text(
            r#"{"is_atomic": true, "agent": "debug", "confidence": "high", "reasoning": "single diagnosis"}"#,
        ));
        let classifier = TaskClassifier::new(provider);

        let c = classifier.classify("why does this panic?").await.unwrap();
        assert!(c.is_atomic);
        assert_eq!(c.agent, AgentKind::Debug);
        assert_eq!(c.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn rule_violating_verdict_raises() {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text(
            r#"{"is_atomic": false, "agent": "coder"}"#,
        ));
        let classifier = TaskClassifier::new(provider);

        let err = classifier.classify("big task").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn garbage_output_falls_back_to_keywords() {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text("I think this is atomic!"));
        let classifier = TaskClassifier::new(provider);

        let c = classifier.classify("fix the error in foo.rs").await.unwrap();
        assert_eq!(c.confidence, Confidence::Low);
        assert_eq!(c.agent, AgentKind::Debug);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_keywords() {
        // Empty queue makes the fake provider error.
        let provider = Arc::new(FakeProvider::new());
        let classifier = TaskClassifier::new(provider);

        let c = classifier.classify("explain this module").await.unwrap();
        assert_eq!(c.agent, AgentKind::Explain);
    }

    #[tokio::test]
    async fn fenced_json_is_tolerated() {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text(
            "```json\n{\"is_atomic\": true, \"agent\": \"coder\"}\n```",
        ));
        let classifier = TaskClassifier::new(provider);
        let c = classifier.classify("rename a variable").await.unwrap();
        assert_eq!(c.agent, AgentKind::Coder);
    }
}
