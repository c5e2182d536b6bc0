//! Observability endpoints over the event bus subscribers.
//!
//! - `GET /events/metrics`                -- global counters
//! - `GET /events/metrics/session/{id}`   -- one session's counters
//! - `GET /events/metrics/sessions`       -- all sessions' counters
//! - `GET /events/audit-log`              -- recent domain events
//! - `GET /events/stats`                  -- runtime internals snapshot

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::state::AppState;

pub async fn global_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!(state.metrics.global()))
}

pub async fn session_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.metrics.session(&session_id) {
        Some(metrics) => Json(serde_json::json!({
            "session_id": session_id,
            "metrics": metrics,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no metrics for session {session_id}") })),
        )
            .into_response(),
    }
}

pub async fn all_session_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!(state.metrics.sessions()))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let entries = state.audit.recent(query.limit);
    Json(serde_json::json!({
        "entries": entries,
        "count": entries.len(),
    }))
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let commits: serde_json::Map<String, serde_json::Value> = state
        .commit_metrics
        .snapshot()
        .into_iter()
        .map(|(label, s)| {
            (
                label,
                serde_json::json!({
                    "count": s.count,
                    "errors": s.errors,
                    "total_ms": s.total.as_millis() as u64,
                    "max_ms": s.max.as_millis() as u64,
                }),
            )
        })
        .collect();

    Json(serde_json::json!({
        "sessions": state.conversations.list_sessions().len(),
        "tracked_fsm_contexts": state.fsm.session_count(),
        "held_session_locks": state.session_locks.session_count(),
        "dedupe_cache_size": state.dedupe.len(),
        "live_snapshots": state.conversations.snapshot_count(),
        "event_subscribers": state.bus.subscriber_count(),
        "audit_entries": state.audit.len(),
        "commits": commits,
    }))
}
