mod approvals;
mod execution;
mod gateway;
mod llm;
mod server;
mod storage;

pub use approvals::*;
pub use execution::*;
pub use gateway::*;
pub use llm::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| crate::Error::Config(e.to_string()))?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides for the deploy-time settings.
    ///
    /// Recognized variables: `AGENT_URL`, `INTERNAL_API_KEY`,
    /// `AGENT_STREAM_TIMEOUT`, `LLM_PROXY_URL`, `DEFAULT_MODEL`,
    /// `LITELLM_API_KEY`, `DB_URL`.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AGENT_URL") {
            if !v.is_empty() {
                self.gateway.agent_url = v;
            }
        }
        if let Ok(v) = std::env::var("INTERNAL_API_KEY") {
            if !v.is_empty() {
                self.gateway.internal_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("AGENT_STREAM_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.gateway.stream_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("LLM_PROXY_URL") {
            if !v.is_empty() {
                self.llm.proxy_url = v;
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_MODEL") {
            if !v.is_empty() {
                self.llm.default_model = v;
            }
        }
        if let Ok(v) = std::env::var("LITELLM_API_KEY") {
            if !v.is_empty() {
                self.llm.api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("DB_URL") {
            if !v.is_empty() {
                self.storage.url = v;
            }
        }
    }

    /// Validate and return the list of issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.proxy_url.is_empty() {
            issues.push(ConfigIssue::error(
                "llm.proxy_url is empty; set LLM_PROXY_URL or [llm] proxy_url",
            ));
        }
        if self.llm.api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "llm.api_key is unset; requests to the LLM proxy will be unauthenticated",
            ));
        }
        if self.gateway.internal_api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "gateway.internal_api_key is unset; internal auth is disabled",
            ));
        }
        if self.execution.max_parallel_tasks == 0 {
            issues.push(ConfigIssue::error("execution.max_parallel_tasks must be >= 1"));
        }
        if self.execution.dedupe_ttl_secs == 0 {
            issues.push(ConfigIssue::error("execution.dedupe_ttl_secs must be >= 1"));
        }
        for (idx, rule) in self.approvals.rules.iter().enumerate() {
            if rule.subject_pattern.is_empty() {
                issues.push(ConfigIssue::error(format!(
                    "approvals.rules[{idx}].subject_pattern is empty"
                )));
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors_beyond_llm_url() {
        let config = Config {
            llm: LlmConfig {
                proxy_url: "http://localhost:4000".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn empty_proxy_url_is_an_error() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("proxy_url")));
    }

    #[test]
    fn toml_round_trip() {
        let raw = r#"
            [server]
            port = 9000

            [llm]
            proxy_url = "http://proxy:4000"
            default_model = "gpt-4o"

            [[approvals.rules]]
            kind = "tool"
            subject_pattern = "write_file"
            requires_approval = true
            reason = "File modification requires approval"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.llm.default_model, "gpt-4o");
        assert_eq!(config.approvals.rules.len(), 1);
        assert!(config.approvals.rules[0].requires_approval);
    }
}
