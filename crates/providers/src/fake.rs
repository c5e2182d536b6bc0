//! Scripted provider for tests.
//!
//! Responses are queued ahead of time; each `chat`/`chat_stream` call
//! consumes the next one. Streaming splits the content into
//! whitespace-preserving token chunks and replays tool calls through the
//! started/finished event pair, matching what the wire adapter produces.

use std::collections::VecDeque;

use parking_lot::Mutex;

use ens_domain::error::{Error, Result};
use ens_domain::event::BoxStream;
use ens_domain::message::ToolCall;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, StreamEvent, Usage};

/// One canned completion.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Explicit token split; when empty the content is split on spaces.
    pub tokens: Vec<String>,
    /// Raw stream events replayed verbatim before everything else, for
    /// exercising assembly paths (e.g. a call opened with argument
    /// fragments but no finish event).
    pub raw_events: Vec<StreamEvent>,
}

impl ScriptedResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tokens(tokens: &[&str]) -> Self {
        Self {
            content: tokens.concat(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                arguments,
            }],
            ..Default::default()
        }
    }

    /// A tool call streamed as an opening event plus argument fragments,
    /// with no finish event. Consumers must assemble the arguments from
    /// the deltas themselves.
    pub fn streamed_tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        fragments: &[&str],
    ) -> Self {
        let call_id = call_id.into();
        let mut raw_events = vec![StreamEvent::ToolCallStarted {
            call_id: call_id.clone(),
            tool_name: tool_name.into(),
        }];
        for fragment in fragments {
            raw_events.push(StreamEvent::ToolCallDelta {
                call_id: call_id.clone(),
                delta: fragment.to_string(),
            });
        }
        Self {
            raw_events,
            ..Default::default()
        }
    }

    fn token_chunks(&self) -> Vec<String> {
        if !self.tokens.is_empty() {
            return self.tokens.clone();
        }
        if self.content.is_empty() {
            return Vec::new();
        }
        // Split keeping the separator attached so concatenation restores
        // the original text.
        let mut chunks = Vec::new();
        let mut current = String::new();
        for ch in self.content.chars() {
            current.push(ch);
            if ch == ' ' {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

/// In-memory provider replaying scripted responses.
pub struct FakeProvider {
    id: String,
    queue: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            id: "fake".into(),
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, response: ScriptedResponse) {
        self.queue.lock().push_back(response);
    }

    /// All requests the provider has received, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    fn next_response(&self, req: &ChatRequest) -> Result<ScriptedResponse> {
        self.requests.lock().push(req.clone());
        self.queue.lock().pop_front().ok_or_else(|| Error::Provider {
            provider: self.id.clone(),
            message: "no scripted response queued".into(),
        })
    }
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let scripted = self.next_response(req)?;
        Ok(ChatResponse {
            content: scripted.content.clone(),
            tool_calls: scripted.tool_calls.clone(),
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
            }),
            model: "fake-model".into(),
            finish_reason: Some(if scripted.tool_calls.is_empty() {
                "stop".into()
            } else {
                "tool_calls".into()
            }),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let scripted = self.next_response(req)?;
        let tokens = scripted.token_chunks();
        let tool_calls = scripted.tool_calls.clone();
        let raw_events = scripted.raw_events.clone();

        let stream = async_stream::stream! {
            for event in raw_events {
                yield Ok(event);
            }
            for text in tokens {
                yield Ok(StreamEvent::Token { text });
            }
            for tc in tool_calls {
                yield Ok(StreamEvent::ToolCallStarted {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                });
                yield Ok(StreamEvent::ToolCallFinished {
                    call_id: tc.call_id,
                    tool_name: tc.tool_name,
                    arguments: tc.arguments,
                });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    total_tokens: 10,
                }),
                finish_reason: None,
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn chat_replays_queue_in_order() {
        let provider = FakeProvider::new();
        provider.enqueue(ScriptedResponse::text("first"));
        provider.enqueue(ScriptedResponse::text("second"));

        let req = ChatRequest::default();
        assert_eq!(provider.chat(&req).await.unwrap().content, "first");
        assert_eq!(provider.chat(&req).await.unwrap().content, "second");
        assert!(provider.chat(&req).await.is_err());
    }

    #[tokio::test]
    async fn stream_splits_content_into_tokens() {
        let provider = FakeProvider::new();
        provider.enqueue(ScriptedResponse::text("Hi there."));

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut text = String::new();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Token { text: t } => text.push_str(&t),
                StreamEvent::Done { .. } => saw_done = true,
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(text, "Hi there.");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn stream_replays_tool_calls() {
        let provider = FakeProvider::new();
        provider.enqueue(ScriptedResponse::tool_call(
            "c-9",
            "write_file",
            serde_json::json!({"path": "a.py"}),
        ));

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut finished = None;
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCallFinished {
                call_id, tool_name, ..
            } = event.unwrap()
            {
                finished = Some((call_id, tool_name));
            }
        }
        assert_eq!(finished.unwrap(), ("c-9".into(), "write_file".into()));
    }

    #[tokio::test]
    async fn streamed_tool_call_replays_start_and_deltas_without_finish() {
        let provider = FakeProvider::new();
        provider.enqueue(ScriptedResponse::streamed_tool_call(
            "c-7",
            "write_file",
            &["{\"path\":", "\"a.py\"}"],
        ));

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut saw_start = false;
        let mut fragments = String::new();
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::ToolCallStarted { call_id, .. } => {
                    assert_eq!(call_id, "c-7");
                    saw_start = true;
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    assert_eq!(call_id, "c-7");
                    fragments.push_str(&delta);
                }
                StreamEvent::ToolCallFinished { .. } => panic!("no finish event was scripted"),
                StreamEvent::Done { .. } => {}
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert!(saw_start);
        assert_eq!(fragments, "{\"path\":\"a.py\"}");
    }

    #[tokio::test]
    async fn records_incoming_requests() {
        let provider = FakeProvider::new();
        provider.enqueue(ScriptedResponse::text("ok"));
        let req = ChatRequest {
            model: Some("special".into()),
            ..Default::default()
        };
        provider.chat(&req).await.unwrap();
        assert_eq!(provider.requests()[0].model.as_deref(), Some("special"));
    }
}
