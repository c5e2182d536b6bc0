//! Reader for the runtime's SSE stream.
//!
//! Incremental line parsing over the response body: track the current
//! `event:` name, decode `data:` payloads, drop null-valued keys, ignore
//! `:` heartbeats, and stop on `event: done` or the `[DONE]` sentinel.
//! A `session_info` payload is additionally harvested so the socket
//! learns its server-assigned session id from the first stream.

use serde_json::Value;

/// What to do with one parsed SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineAction {
    /// Forward this JSON object to the client.
    Forward(Value),
    /// The stream is complete.
    Done,
    /// Nothing to forward (event line, heartbeat, blank, junk).
    Ignore,
}

/// Stateful line-by-line SSE reader.
#[derive(Default)]
pub struct SseReader {
    current_event: Option<String>,
    harvested_session_id: Option<String>,
    buffer: String,
}

impl SseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session id announced via `session_info`, if any arrived.
    pub fn session_id(&self) -> Option<&str> {
        self.harvested_session_id.as_deref()
    }

    /// Feed a raw body chunk; returns the actions for every complete
    /// line it contained. A trailing partial line stays buffered.
    pub fn feed(&mut self, chunk: &str) -> Vec<LineAction> {
        self.buffer.push_str(chunk);
        let mut actions = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let action = self.process_line(line.trim_end_matches(['\n', '\r']));
            let done = action == LineAction::Done;
            actions.push(action);
            if done {
                break;
            }
        }
        actions
    }

    /// Process one complete SSE line.
    pub fn process_line(&mut self, line: &str) -> LineAction {
        // Blank line: event separator.
        if line.is_empty() {
            self.current_event = None;
            return LineAction::Ignore;
        }

        // Heartbeat comment.
        if line.starts_with(':') {
            tracing::debug!("sse heartbeat");
            return LineAction::Ignore;
        }

        if let Some(event) = line.strip_prefix("event:") {
            let event = event.trim();
            if event == "done" {
                return LineAction::Done;
            }
            self.current_event = Some(event.to_string());
            return LineAction::Ignore;
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data == "[DONE]" {
                return LineAction::Done;
            }
            return match serde_json::from_str::<Value>(data) {
                Ok(value) => {
                    let filtered = drop_nulls(value);
                    if filtered
                        .get("type")
                        .and_then(|t| t.as_str())
                        .map(|t| t == "session_info")
                        .unwrap_or(false)
                    {
                        if let Some(sid) =
                            filtered.get("session_id").and_then(|s| s.as_str())
                        {
                            tracing::info!(session_id = %sid, "session id announced");
                            self.harvested_session_id = Some(sid.to_string());
                        }
                    }
                    LineAction::Forward(filtered)
                }
                Err(e) => {
                    tracing::warn!(
                        event = self.current_event.as_deref().unwrap_or(""),
                        error = %e,
                        "unparseable sse data line"
                    );
                    LineAction::Ignore
                }
            };
        }

        tracing::debug!(line = %line, "ignoring unknown sse line");
        LineAction::Ignore
    }
}

/// Remove top-level null values so clients never see absent fields.
fn drop_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        ),
        other => other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
