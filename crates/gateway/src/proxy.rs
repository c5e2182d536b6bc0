//! Verbatim REST proxying to the runtime.
//!
//! The gateway never interprets these responses; status and body pass
//! through unchanged, with the internal auth header attached.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::state::GatewayState;

pub async fn proxy_get(State(state): State<GatewayState>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let url = format!("{}{}", state.agent_url(), path_and_query);

    let mut upstream = state.http.get(&url);
    if let Some(key) = &state.config.gateway.internal_api_key {
        upstream = upstream.header("X-Internal-Auth", key);
    }

    match upstream.send().await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();
            match response.bytes().await {
                Ok(body) => Response::builder()
                    .status(status)
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()),
                Err(e) => (
                    StatusCode::BAD_GATEWAY,
                    axum::Json(serde_json::json!({ "error": format!("upstream read failed: {e}") })),
                )
                    .into_response(),
            }
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(serde_json::json!({ "error": format!("upstream unreachable: {e}") })),
        )
            .into_response(),
    }
}
