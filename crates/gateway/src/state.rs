use std::sync::Arc;

use ens_domain::config::Config;

/// Shared gateway state: config plus the HTTP client used for both the
/// streaming hop and REST proxying.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.gateway.stream_timeout_secs,
            ))
            .build()?;
        Ok(Self { config, http })
    }

    /// Base URL of the runtime, no trailing slash.
    pub fn agent_url(&self) -> String {
        self.config
            .gateway
            .agent_url
            .trim_end_matches('/')
            .to_string()
    }
}
