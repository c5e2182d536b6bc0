//! LLM backend adapters.
//!
//! The runtime talks to one [`LlmProvider`]; the production adapter is
//! [`litellm::LiteLlmProvider`] (OpenAI chat-completions wire format via
//! the LLM proxy), and [`fake::FakeProvider`] serves scripted responses
//! in tests.

pub mod fake;
pub mod litellm;
mod sse;
pub mod traits;

pub use fake::{FakeProvider, ScriptedResponse};
pub use litellm::LiteLlmProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider, StreamEvent, Usage};
