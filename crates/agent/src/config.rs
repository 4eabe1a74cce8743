use anyhow::{Context, Result};
use rasp_common::AgentConfig;
use tracing::info;

/// Environment variable that overrides `cloud.token`.
pub const TOKEN_ENV: &str = "RASP_TOKEN";

pub fn load(path: &str) -> Result<AgentConfig> {
    let config = AgentConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path))?;
    Ok(with_token_override(config, std::env::var(TOKEN_ENV).ok()))
}

/// A non-empty override replaces the configured bootstrap token.
pub fn with_token_override(mut config: AgentConfig, token: Option<String>) -> AgentConfig {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        info!("using bootstrap token from {}", TOKEN_ENV);
        config.cloud.token = Some(token.trim().to_string());
    }
    config
}
