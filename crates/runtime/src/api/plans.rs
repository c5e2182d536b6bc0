//! Plan control endpoints.
//!
//! - `GET  /plans/{plan_id}/status`  -- execution progress report
//! - `POST /plans/{plan_id}/cancel`  -- cancel a live plan

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ens_domain::error::Error;

use crate::state::AppState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn plan_status(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Response {
    match state.engine.execution_status(&state, &plan_id) {
        Ok(status) => Json(status).into_response(),
        Err(Error::NotFound(m)) => api_error(StatusCode::NOT_FOUND, m),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "cancelled by operator".into()
}

pub async fn cancel_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<CancelRequest>,
) -> Response {
    // Plan mutation happens under the owning session's lock, like every
    // other turn.
    let session_id = match state.plans.find_by_id(&plan_id) {
        Some(plan) => plan.conversation_id,
        None => return api_error(StatusCode::NOT_FOUND, format!("plan {plan_id}")),
    };
    let _permit = state.session_locks.acquire(&session_id).await;

    let mut uow = state.new_uow();
    let result = state
        .engine
        .cancel_execution(&state, &mut uow, &plan_id, &body.reason);
    match result {
        Ok(value) => {
            if let Err(e) = uow.finish("cancel_plan_request") {
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
            Json(value).into_response()
        }
        Err(Error::NotFound(m)) => api_error(StatusCode::NOT_FOUND, m),
        Err(Error::InvalidTransition(m)) => api_error(StatusCode::CONFLICT, m),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
