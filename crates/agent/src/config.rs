//! Agent configuration

use advisor_lib::config::{environment, AdvisorConfig};
use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "ADVISOR_CONFIG_FILE";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// API server port for predictions, history, health and metrics
    pub api_port: u16,

    /// Paths and training parameters shared with the CLI
    pub advisor: AdvisorConfig,
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let settings = AdvisorConfig::builder(file)
            .add_source(environment())
            .build()
            .context("Failed to read configuration")?;

        let api_port = match settings.get::<u16>("api_port") {
            Ok(port) => port,
            Err(config::ConfigError::NotFound(_)) => default_api_port(),
            Err(e) => return Err(e).context("Invalid api_port"),
        };
        let advisor = settings
            .try_deserialize::<AdvisorConfig>()
            .context("Invalid advisor configuration")?;

        Ok(Self { api_port, advisor })
    }
}
