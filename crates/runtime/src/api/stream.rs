//! The streaming endpoint: `POST /agent/message/stream`.
//!
//! The body carries an optional session id and one client frame. The
//! response is SSE: `event: message` records with JSON payloads,
//! terminated by `event: done` / `data: [DONE]`.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use serde::Deserialize;

use ens_domain::event::AgentEvent;
use ens_domain::frame::ClientFrame;

use crate::runtime::handle_frame;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// The client frame, verbatim.
    pub message: serde_json::Value,
}

pub async fn message_stream(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<StreamRequest>,
) -> impl IntoResponse {
    // Validate the frame before opening the runtime stream; malformed
    // input still yields a well-formed (single-error) SSE body.
    let frame = match ClientFrame::parse(&body.message.to_string()) {
        Ok(frame) => frame,
        Err(e) => {
            let stream = single_event_stream(AgentEvent::fatal(e.to_string()));
            return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
        }
    };

    let (_session_id, rx) = handle_frame(state, body.session_id, frame);
    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    mut rx: tokio::sync::mpsc::Receiver<AgentEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event("message").data(data));
        }
        yield Ok(Event::default().event("done").data("[DONE]"));
    }
}

fn single_event_stream(
    event: AgentEvent,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let data = serde_json::to_string(&event).unwrap_or_default();
        yield Ok(Event::default().event("message").data(data));
        yield Ok(Event::default().event("done").data("[DONE]"));
    }
}
