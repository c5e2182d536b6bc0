use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Width hint for execution-level batching. Subtask dispatch is
    /// sequential (one per request); this only shapes status reporting.
    #[serde(default = "d_max_parallel")]
    pub max_parallel_tasks: usize,
    /// Approval-waiter timeout, in seconds.
    #[serde(default = "d_approval_wait_timeout")]
    pub approval_wait_timeout_secs: u64,
    /// Approval-waiter poll interval, in milliseconds.
    #[serde(default = "d_approval_poll_interval")]
    pub approval_poll_interval_ms: u64,
    /// TTL for the tool-result dedupe cache, in seconds.
    #[serde(default = "d_dedupe_ttl")]
    pub dedupe_ttl_secs: u64,
    /// Capacity cap for the dedupe cache.
    #[serde(default = "d_dedupe_max")]
    pub dedupe_max_entries: usize,
    /// Maximum tool-call rounds within a single agent turn.
    #[serde(default = "d_max_tool_loops")]
    pub max_tool_loops: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: d_max_parallel(),
            approval_wait_timeout_secs: d_approval_wait_timeout(),
            approval_poll_interval_ms: d_approval_poll_interval(),
            dedupe_ttl_secs: d_dedupe_ttl(),
            dedupe_max_entries: d_dedupe_max(),
            max_tool_loops: d_max_tool_loops(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_parallel() -> usize {
    3
}
fn d_approval_wait_timeout() -> u64 {
    300
}
fn d_approval_poll_interval() -> u64 {
    500
}
fn d_dedupe_ttl() -> u64 {
    60
}
fn d_dedupe_max() -> usize {
    10_000
}
fn d_max_tool_loops() -> usize {
    25
}
