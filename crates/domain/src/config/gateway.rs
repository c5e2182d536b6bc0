use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway (WebSocket bridge)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "d_gw_port")]
    pub port: u16,
    #[serde(default = "d_gw_host")]
    pub host: String,
    /// Base URL of the runtime (the `AGENT_URL` environment variable).
    #[serde(default = "d_agent_url")]
    pub agent_url: String,
    /// Shared secret sent as `X-Internal-Auth` on every runtime request.
    /// `None` disables internal auth (dev mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_api_key: Option<String>,
    /// Read timeout for the runtime SSE stream, in seconds. Generous by
    /// default: LLM outputs can stall between tokens.
    #[serde(default = "d_stream_timeout")]
    pub stream_timeout_secs: u64,
    /// Idle timeout for the upstream WebSocket, in seconds. 0 disables.
    #[serde(default = "d_ws_idle_timeout")]
    pub ws_idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: d_gw_port(),
            host: d_gw_host(),
            agent_url: d_agent_url(),
            internal_api_key: None,
            stream_timeout_secs: d_stream_timeout(),
            ws_idle_timeout_secs: d_ws_idle_timeout(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_gw_port() -> u16 {
    8000
}
fn d_gw_host() -> String {
    "127.0.0.1".into()
}
fn d_agent_url() -> String {
    "http://127.0.0.1:8010".into()
}
fn d_stream_timeout() -> u64 {
    300
}
fn d_ws_idle_timeout() -> u64 {
    0
}
