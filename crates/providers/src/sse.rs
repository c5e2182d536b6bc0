//! SSE plumbing for the streaming LLM adapter.
//!
//! The proxy answers with `text/event-stream`: blocks of `event:` /
//! `data:` lines separated by blank lines. [`SseBuffer`] accumulates
//! body chunks and yields complete `data:` payloads; [`sse_response_stream`]
//! turns a `reqwest::Response` plus a payload parser into a stream of
//! [`StreamEvent`]s.

use ens_domain::error::{Error, Result};
use ens_domain::event::BoxStream;

use crate::traits::StreamEvent;

/// Chunk accumulator that understands SSE event framing.
///
/// Only `data:` lines matter for the chat stream; `event:`, `id:` and
/// `retry:` lines are framing noise here. A trailing partial block stays
/// buffered until more bytes arrive.
#[derive(Default)]
pub(crate) struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body chunk and return every complete `data:` payload.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.find("\n\n") {
            let block: String = self.pending.drain(..pos + 2).collect();
            Self::collect_data_lines(&block, &mut payloads);
        }
        payloads
    }

    /// Flush whatever is left once the body has closed.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        let mut payloads = Vec::new();
        if !rest.trim().is_empty() {
            Self::collect_data_lines(&rest, &mut payloads);
        }
        payloads
    }

    fn collect_data_lines(block: &str, out: &mut Vec<String>) {
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
    }
}

/// Build a [`BoxStream`] of parsed events from an SSE response.
///
/// The parser closure maps one `data:` payload to zero or more events.
/// When the body closes without the parser having produced a `Done`
/// event, a synthetic one is appended so consumers always see an end.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::new();
        let mut done_emitted = false;

        loop {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => buffer.push(&String::from_utf8_lossy(&bytes)),
                Ok(None) => {
                    for data in buffer.finish() {
                        for event in parse_data(&data) {
                            done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            };

            for data in payloads {
                for event in parse_data(&data) {
                    done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
