//! HTTP surface of the runtime.

pub mod agents;
pub mod auth;
pub mod events;
pub mod plans;
pub mod sessions;
pub mod stream;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full router. Every route except the health probe sits
/// behind the internal-auth guard (a no-op when no key is configured).
pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/agent/message/stream", post(stream::message_stream))
        .route("/agents", get(agents::list_agents))
        .route("/agents/:session_id/current", get(agents::current_agent))
        .route("/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/sessions/:id/history", get(sessions::session_history))
        .route(
            "/sessions/:id/pending-approvals",
            get(sessions::pending_approvals),
        )
        .route("/sessions/:id", delete(sessions::delete_session))
        .route("/plans/:plan_id/status", get(plans::plan_status))
        .route("/plans/:plan_id/cancel", post(plans::cancel_plan))
        .route("/events/metrics", get(events::global_metrics))
        .route(
            "/events/metrics/session/:id",
            get(events::session_metrics),
        )
        .route("/events/metrics/sessions", get(events::all_session_metrics))
        .route("/events/audit-log", get(events::audit_log))
        .route("/events/stats", get(events::stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal_auth,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
