use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the LLM proxy (the `LLM_PROXY_URL` environment
    /// variable). OpenAI chat-completions wire format.
    #[serde(default)]
    pub proxy_url: String,
    /// Model used when a request carries no override (`DEFAULT_MODEL`).
    #[serde(default = "d_model")]
    pub default_model: String,
    /// API key for the proxy (`LITELLM_API_KEY`). `None` sends no auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout, in seconds.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    /// Sampling temperature for agent turns.
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            default_model: d_model(),
            api_key: None,
            request_timeout_secs: d_request_timeout(),
            temperature: d_temperature(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model() -> String {
    "gpt-4o".into()
}
fn d_request_timeout() -> u64 {
    120
}
fn d_temperature() -> f32 {
    0.2
}
