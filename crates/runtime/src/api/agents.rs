//! Agent listing endpoints.
//!
//! - `GET /agents`                        -- registered agents
//! - `GET /agents/{session_id}/current`   -- the session's active agent

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.registry.list();
    Json(serde_json::json!({
        "agents": agents,
        "count": agents.len(),
    }))
}

pub async fn current_agent(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.conversations.active_agent(&session_id) {
        Some(agent) => Json(serde_json::json!({
            "session_id": session_id,
            "agent_type": agent,
        }))
        .into_response(),
        None => api_error(
            StatusCode::NOT_FOUND,
            format!("session {session_id} not found"),
        ),
    }
}
