//! The architect: decomposes complex goals into execution plans.
//!
//! The architect never executes subtasks (the plan entity rejects the
//! assignment, and the registry keeps it out of the dispatch map). Its
//! one job is drafting: ask the model for a JSON decomposition, parse
//! it, and build a validated DRAFT plan.

use std::sync::Arc;

use serde::Deserialize;

use ens_domain::agent::AgentKind;
use ens_domain::error::{Error, Result};
use ens_domain::message::Message;
use ens_domain::plan::{ExecutionPlan, Subtask, MAX_GOAL_LEN};
use ens_providers::{ChatRequest, LlmProvider};

const PLANNING_PROMPT: &str = r#"You are the architect agent. Decompose the user's goal into a plan of
atomic subtasks for specialist agents.

Agents available for subtasks: "coder", "debug", "explain", "orchestrator".
Never assign a subtask to "architect".

Each subtask: a short unique id (st-1, st-2, ...), a concrete
description, the agent tag, and the ids of subtasks it depends on.
Dependencies must form a DAG; independent subtasks should not depend on
each other.

Respond with ONLY a JSON object:
{"subtasks": [{"id": "st-1", "description": "...", "agent": "coder", "dependencies": []}]}"#;

pub struct ArchitectAgent {
    provider: Arc<dyn LlmProvider>,
    description: String,
}

impl ArchitectAgent {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            description: "decomposes complex tasks into execution plans".into(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        AgentKind::Architect
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Draft a plan for `goal`. `feedback` carries the user's revision
    /// notes when a previous draft was sent back.
    pub async fn draft_plan(
        &self,
        session_id: &str,
        goal: &str,
        feedback: Option<&str>,
    ) -> Result<ExecutionPlan> {
        let goal = truncate_goal(goal);

        let mut messages = vec![Message::system(PLANNING_PROMPT)];
        messages.push(Message::user(format!("Goal: {goal}")));
        if let Some(feedback) = feedback {
            messages.push(Message::user(format!(
                "The previous plan was sent back with this feedback; produce a \
                 revised plan:\n{feedback}"
            )));
        }

        let req = ChatRequest {
            messages,
            json_mode: true,
            temperature: Some(0.0),
            ..Default::default()
        };
        let response = self.provider.chat(&req).await?;

        let draft = parse_draft(&response.content)?;
        if draft.subtasks.is_empty() {
            return Err(Error::Validation(
                "architect produced an empty plan".into(),
            ));
        }

        let plan_id = format!("p-{}", uuid::Uuid::new_v4());
        let mut plan = ExecutionPlan::new(plan_id, session_id, &goal)?;
        for st in draft.subtasks {
            let agent = AgentKind::parse(&st.agent)?;
            plan.add_subtask(Subtask::new(
                st.id,
                st.description,
                agent,
                st.dependencies,
            )?)?;
        }

        tracing::info!(
            session_id = %session_id,
            plan_id = %plan.id,
            subtasks = plan.subtasks.len(),
            "plan drafted"
        );
        Ok(plan)
    }
}

#[derive(Deserialize)]
struct Draft {
    subtasks: Vec<DraftSubtask>,
}

#[derive(Deserialize)]
struct DraftSubtask {
    id: String,
    description: String,
    agent: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn parse_draft(raw: &str) -> Result<Draft> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(trimmed)
        .map_err(|e| Error::Validation(format!("architect output is not a valid plan: {e}")))
}

fn truncate_goal(goal: &str) -> String {
    if goal.len() <= MAX_GOAL_LEN {
        return goal.to_string();
    }
    let mut end = MAX_GOAL_LEN;
    while !goal.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    goal[..end].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::plan::PlanStatus;
    use ens_providers::{FakeProvider, ScriptedResponse};

    fn scripted_architect(json: &str) -> ArchitectAgent {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text(json));
        ArchitectAgent::new(provider)
    }

    #[tokio::test]
    async fn drafts_a_plan_from_json() {
        let architect = scripted_architect(
            r#"{"subtasks": [
                {"id": "st-1", "description": "build the form", "agent": "coder", "dependencies": []},
                {"id": "st-2", "description": "write tests", "agent": "coder", "dependencies": ["st-1"]}
            ]}"#,
        );

        let plan = architect
            .draft_plan("s-1", "Build login screen with tests", None)
            .await
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Draft);
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[1].dependencies, vec!["st-1"]);
        assert_eq!(plan.conversation_id, "s-1");
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let architect = scripted_architect(r#"{"subtasks": []}"#);
        let err = architect.draft_plan("s-1", "goal", None).await.unwrap_err();
        assert!(err.to_string().contains("empty plan"));
    }

    #[tokio::test]
    async fn architect_assignment_is_rejected() {
        let architect = scripted_architect(
            r#"{"subtasks": [{"id": "st-1", "description": "x", "agent": "architect", "dependencies": []}]}"#,
        );
        let err = architect.draft_plan("s-1", "goal", None).await.unwrap_err();
        assert!(err.to_string().contains("architect"));
    }

    #[tokio::test]
    async fn garbage_output_is_a_validation_error() {
        let architect = scripted_architect("step 1: do things");
        let err = architect.draft_plan("s-1", "goal", None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn feedback_is_forwarded_to_the_model() {
        let provider = Arc::new(FakeProvider::new());
        provider.enqueue(ScriptedResponse::text(
            r#"{"subtasks": [{"id": "st-1", "description": "smaller", "agent": "coder", "dependencies": []}]}"#,
        ));
        let architect = ArchitectAgent::new(provider.clone());

        architect
            .draft_plan("s-1", "goal", Some("too big"))
            .await
            .unwrap();

        let sent = provider.requests();
        assert!(sent[0]
            .messages
            .iter()
            .any(|m| m.content.contains("too big")));
    }

    #[test]
    fn long_goal_is_truncated_at_char_boundary() {
        let goal = "g".repeat(MAX_GOAL_LEN + 100);
        assert_eq!(truncate_goal(&goal).len(), MAX_GOAL_LEN);
    }
}
