//! LLM-proxy adapter (OpenAI chat-completions wire format).
//!
//! Talks to the configured proxy endpoint; any backend that follows the
//! OpenAI contract works unchanged (LiteLLM, vLLM, OpenAI itself).

use std::collections::BTreeMap;

use serde_json::Value;

use ens_domain::config::LlmConfig;
use ens_domain::error::{Error, Result};
use ens_domain::event::BoxStream;
use ens_domain::message::{Message, Role, ToolCall, ToolDefinition};

use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LiteLlmProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl LiteLlmProvider {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        if cfg.proxy_url.is_empty() {
            return Err(Error::Config("llm.proxy_url is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: "litellm".into(),
            base_url: cfg.proxy_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.default_model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "name": msg.tool_name.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({"role": "assistant"});
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.call_id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                obj["tool_calls"] = Value::Array(calls);
            }
            obj
        }
        _ => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        tool_calls: parse_wire_tool_calls(message),
        usage: body.get("usage").and_then(parse_wire_usage),
        model,
        finish_reason,
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming: stateful chunk parsing + tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool call under assembly: the wire sends its id and name once,
/// then keys every argument fragment by array index only.
struct PartialToolCall {
    call_id: String,
    tool_name: String,
    arguments: String,
}

/// Stateful parser for streamed completion chunks.
///
/// Argument fragments are accumulated here, per wire index, and flushed
/// as authoritative [`StreamEvent::ToolCallFinished`] events when the
/// model stops (a `finish_reason` chunk or the `[DONE]` sentinel).
/// Consumers therefore never reconcile index-keyed deltas themselves:
/// every delta they see carries the real call id, and every call ends
/// with a finish event holding the fully parsed arguments.
#[derive(Default)]
struct StreamState {
    calls: BTreeMap<u64, PartialToolCall>,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            let mut events = self.flush_finished();
            events.push(Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }));
            return events;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());
        let choice = match choice {
            Some(c) => c,
            None => {
                // Usage-only chunk (stream_options.include_usage).
                if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
                    return vec![Ok(StreamEvent::Done {
                        usage: Some(usage),
                        finish_reason: None,
                    })];
                }
                return Vec::new();
            }
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let usage = v.get("usage").and_then(parse_wire_usage);
            let mut events = self.flush_finished();
            events.push(Ok(StreamEvent::Done {
                usage,
                finish_reason: Some(fr.to_string()),
            }));
            return events;
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            return self.parse_tool_call_deltas(tc_arr);
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return vec![Ok(StreamEvent::Token {
                    text: text.to_string(),
                })];
            }
        }

        Vec::new()
    }

    fn parse_tool_call_deltas(&mut self, tc_arr: &[Value]) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let func = tc.get("function");

            // An `id` opens the call at this index.
            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let tool_name = func
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: tool_name.clone(),
                }));
                self.calls.insert(
                    index,
                    PartialToolCall {
                        call_id: id.to_string(),
                        tool_name,
                        arguments: String::new(),
                    },
                );
            }

            // Argument fragments may ride the opening chunk or arrive
            // bare (index only) on later chunks.
            if let Some(args) = func
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .filter(|a| !a.is_empty())
            {
                match self.calls.get_mut(&index) {
                    Some(call) => {
                        call.arguments.push_str(args);
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: call.call_id.clone(),
                            delta: args.to_string(),
                        }));
                    }
                    None => {
                        tracing::warn!(
                            index,
                            "argument delta before the tool call opened; dropping fragment"
                        );
                    }
                }
            }
        }
        events
    }

    /// Finish every assembled call, in wire (index) order.
    fn flush_finished(&mut self) -> Vec<Result<StreamEvent>> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| {
                let arguments = if call.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    match serde_json::from_str(&call.arguments) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(
                                call_id = %call.call_id,
                                tool = %call.tool_name,
                                error = %e,
                                "streamed tool call arguments are not valid JSON"
                            );
                            Value::Object(Default::default())
                        }
                    }
                };
                Ok(StreamEvent::ToolCallFinished {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for LiteLlmProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState::default();
        Ok(sse_response_stream(resp, move |data| state.parse(data)))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_with_tool_calls_serializes_function_block() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                call_id: "c-1".into(),
                tool_name: "write_file".into(),
                arguments: serde_json::json!({"path": "a.py"}),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "c-1");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "write_file");
    }

    #[test]
    fn tool_result_serializes_binding() {
        let msg = Message::tool_result("c-1", "write_file", "ok");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c-1");
        assert_eq!(wire["content"], "ok");
    }

    #[test]
    fn token_delta_parses() {
        let mut state = StreamState::default();
        let events = state.parse(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "Hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn deltas_are_keyed_by_call_id_not_index() {
        let mut state = StreamState::default();
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c-9","function":{"name":"write_file"}}]}}]}"#,
        );
        let events = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]}}]}"#,
        );
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::ToolCallDelta { call_id, delta } => {
                assert_eq!(call_id, "c-9");
                assert_eq!(delta, "{\"pa");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn full_tool_call_assembly_across_chunks() {
        let mut state = StreamState::default();

        let opened = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c-9","function":{"name":"write_file","arguments":"{\"path\":"}}]}}]}"#,
        );
        assert!(matches!(
            opened[0],
            Ok(StreamEvent::ToolCallStarted { ref call_id, .. }) if call_id == "c-9"
        ));
        assert!(matches!(opened[1], Ok(StreamEvent::ToolCallDelta { .. })));

        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.py\"}"}}]}}]}"#,
        );

        let finished = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert_eq!(finished.len(), 2);
        match finished[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                assert_eq!(call_id, "c-9");
                assert_eq!(tool_name, "write_file");
                assert_eq!(arguments, &serde_json::json!({"path": "a.py"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            finished[1].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: Some(fr), .. } if fr == "tool_calls"
        ));
    }

    #[test]
    fn parallel_tool_calls_finish_in_index_order() {
        let mut state = StreamState::default();
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c-b","function":{"name":"run_command","arguments":"{}"}}]}}]}"#,
        );
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c-a","function":{"name":"read_file","arguments":"{}"}}]}}]}"#,
        );

        let finished = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        let ids: Vec<&str> = finished
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                StreamEvent::ToolCallFinished { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["c-a", "c-b"]);
    }

    #[test]
    fn done_sentinel_flushes_open_calls() {
        let mut state = StreamState::default();
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c-9","function":{"name":"write_file","arguments":"{\"path\":\"a\"}"}}]}}]}"#,
        );
        let events = state.parse("[DONE]");
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ToolCallFinished { call_id, .. } if call_id == "c-9"
        ));
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[test]
    fn unparseable_arguments_default_to_empty_object() {
        let mut state = StreamState::default();
        state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c-9","function":{"name":"write_file","arguments":"{broken"}}]}}]}"#,
        );
        let finished = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        match finished[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished { arguments, .. } => {
                assert_eq!(arguments, &serde_json::json!({}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn finish_reason_without_calls_is_just_done() {
        let mut state = StreamState::default();
        let events = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: Some(fr), .. } if fr == "stop"
        ));
    }

    #[test]
    fn usage_only_chunk_parses() {
        let mut state = StreamState::default();
        let events = state.parse(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::Done { usage, .. } => assert_eq!(usage.unwrap().total_tokens, 15),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn orphan_delta_is_dropped_not_misfiled() {
        let mut state = StreamState::default();
        let events = state.parse(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":3,"function":{"arguments":"{\"x\":1}"}}]}}]}"#,
        );
        assert!(events.is_empty());
        let finished = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        // Only the Done event: nothing was ever opened.
        assert_eq!(finished.len(), 1);
    }

    #[test]
    fn parse_chat_response_extracts_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c-1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"a\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response("litellm", &body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["path"], "a");
    }
}
