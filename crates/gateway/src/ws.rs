//! WebSocket endpoint for clients.
//!
//! Flow per inbound frame:
//! 1. Parse and validate the JSON frame (invalid input gets an `error`
//!    frame back, connection preserved)
//! 2. Forward it to the runtime streaming endpoint as a JSON body,
//!    including the session id unless the socket opened with a `new_*`
//!    placeholder
//! 3. Relay every SSE payload back over the socket until the stream ends
//! 4. Adopt the server-assigned session id announced via `session_info`

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::StreamExt;

use ens_domain::frame::ClientFrame;

use crate::sse::{LineAction, SseReader};
use crate::state::GatewayState;

/// GET /ws/{session_id} -- upgrade to WebSocket.
///
/// `new_*` session ids are placeholders: the runtime assigns the real id
/// and announces it on the first stream.
pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState, session_id: String) {
    let mut is_temp_session = session_id.starts_with("new_");
    let mut actual_session_id = session_id;
    tracing::info!(
        session_id = %actual_session_id,
        temp = is_temp_session,
        "websocket connected"
    );

    let idle_timeout = state.config.gateway.ws_idle_timeout_secs;

    loop {
        let received = if idle_timeout > 0 {
            match tokio::time::timeout(
                std::time::Duration::from_secs(idle_timeout),
                socket.recv(),
            )
            .await
            {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::info!(session_id = %actual_session_id, "websocket idle timeout");
                    break;
                }
            }
        } else {
            socket.recv().await
        };

        let raw = match received {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(session_id = %actual_session_id, error = %e, "websocket error");
                break;
            }
        };

        // Validate before forwarding; bad frames keep the connection.
        let frame = match ClientFrame::parse(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session_id = %actual_session_id, error = %e, "invalid frame");
                if send_error(&mut socket, &e.to_string()).await.is_err() {
                    break;
                }
                continue;
            }
        };
        tracing::info!(
            session_id = %actual_session_id,
            frame = frame.kind(),
            "forwarding frame to runtime"
        );

        match forward_to_runtime(
            &state,
            &mut socket,
            &actual_session_id,
            is_temp_session,
            &raw,
        )
        .await
        {
            Ok(Some(new_session_id)) => {
                if new_session_id != actual_session_id {
                    tracing::info!(
                        old = %actual_session_id,
                        new = %new_session_id,
                        "session id updated"
                    );
                    actual_session_id = new_session_id;
                }
                is_temp_session = false;
            }
            Ok(None) => {}
            Err(()) => break, // socket gone
        }
    }

    tracing::info!(session_id = %actual_session_id, "websocket disconnected");
}

/// Forward one raw frame to the runtime and relay its SSE stream.
///
/// Returns the harvested session id (if announced). `Err(())` means the
/// socket itself failed; runtime-side failures are reported over the
/// socket and keep the connection open.
async fn forward_to_runtime(
    state: &GatewayState,
    socket: &mut WebSocket,
    session_id: &str,
    is_temp_session: bool,
    raw_frame: &str,
) -> Result<Option<String>, ()> {
    let frame_json: serde_json::Value = match serde_json::from_str(raw_frame) {
        Ok(v) => v,
        Err(e) => {
            send_error(socket, &format!("invalid JSON: {e}")).await?;
            return Ok(None);
        }
    };

    // Placeholder ids are never forwarded; the runtime mints the real
    // one and announces it via session_info.
    let payload = if is_temp_session {
        serde_json::json!({ "message": frame_json })
    } else {
        serde_json::json!({ "session_id": session_id, "message": frame_json })
    };

    let mut request = state
        .http
        .post(format!("{}/agent/message/stream", state.agent_url()))
        .json(&payload);
    if let Some(key) = &state.config.gateway.internal_api_key {
        request = request.header("X-Internal-Auth", key);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "runtime request failed");
            send_error(socket, &format!("Streaming error: {e}")).await?;
            return Ok(None);
        }
    };

    let status = response.status();
    if !status.is_success() {
        // Drain the body before reporting; streaming responses must be
        // read to completion.
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "runtime returned an error");
        send_error(socket, &format!("Agent error: {}", status.as_u16())).await?;
        return Ok(None);
    }

    // ── Relay the SSE stream ────────────────────────────────────────
    let mut reader = SseReader::new();
    let mut body = response.bytes_stream();
    'stream: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "runtime stream interrupted");
                send_error(socket, &format!("Streaming error: {e}")).await?;
                break;
            }
        };
        for action in reader.feed(&String::from_utf8_lossy(&chunk)) {
            match action {
                LineAction::Forward(value) => {
                    let text = value.to_string();
                    if socket.send(Message::Text(text)).await.is_err() {
                        return Err(());
                    }
                }
                LineAction::Done => break 'stream,
                LineAction::Ignore => {}
            }
        }
    }

    tracing::debug!(session_id = %session_id, "runtime stream completed");
    Ok(reader.session_id().map(String::from))
}

async fn send_error(socket: &mut WebSocket, message: &str) -> Result<(), ()> {
    let frame = serde_json::json!({ "type": "error", "content": message });
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|_| ())
}
