//! Session REST endpoints.
//!
//! - `GET    /sessions`                           -- list session ids
//! - `POST   /sessions`                           -- create a session
//! - `GET    /sessions/{id}/history`              -- ordered messages
//! - `GET    /sessions/{id}/pending-approvals`    -- pending approvals
//! - `DELETE /sessions/{id}`                      -- destroy a session

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use ens_domain::approval::ApprovalKind;

use crate::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions = state.conversations.list_sessions();
    sessions.sort();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

pub async fn create_session(State(state): State<AppState>) -> Response {
    let session_id = format!("s-{}", uuid::Uuid::new_v4());
    state.conversations.get_or_create(&session_id);
    if let Err(e) = state.conversations.persist(&session_id) {
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist session: {e}"),
        );
    }
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "session_id": session_id })),
    )
        .into_response()
}

pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.conversations.get_history(&session_id) {
        Ok(messages) => Json(serde_json::json!({
            "session_id": session_id,
            "messages": messages,
            "count": messages.len(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(serde::Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn pending_approvals(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<PendingQuery>,
) -> Response {
    let kind = match query.kind.as_deref() {
        Some("tool") => Some(ApprovalKind::Tool),
        Some("plan") => Some(ApprovalKind::Plan),
        Some(other) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown approval kind: {other}"),
            )
        }
        None => None,
    };
    let approvals = state.approvals.get_all_pending(&session_id, kind);
    Json(serde_json::json!({
        "session_id": session_id,
        "pending_approvals": approvals,
        "count": approvals.len(),
    }))
    .into_response()
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.conversations.delete(&session_id) {
        Ok(()) => {
            state.fsm.remove(&session_id);
            Json(serde_json::json!({ "deleted": session_id })).into_response()
        }
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}
