//! Internal authentication for the gateway-to-runtime hop.
//!
//! The gateway sends the shared key in `X-Internal-Auth`; the runtime
//! compares SHA-256 digests in constant time. No configured key means
//! auth is disabled (dev mode).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
pub fn token_matches(expected_hash: &[u8], provided: &str) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.as_slice().ct_eq(expected_hash).into()
}

pub async fn require_internal_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.internal_auth_hash else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("X-Internal-Auth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if token_matches(expected, provided) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid internal auth" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_passes() {
        let hash = Sha256::digest(b"secret").to_vec();
        assert!(token_matches(&hash, "secret"));
    }

    #[test]
    fn wrong_token_fails() {
        let hash = Sha256::digest(b"secret").to_vec();
        assert!(!token_matches(&hash, "guess"));
        assert!(!token_matches(&hash, ""));
    }
}
