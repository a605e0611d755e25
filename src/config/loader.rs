use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::{CommandSourceKind, Config, ListenerMode, TurnTermination};

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let listener = &self.listener;

        if listener.recv_timeout.is_zero() {
            anyhow::bail!("listener.recv_timeout must be greater than zero");
        }

        if listener.accept_timeout.is_zero() {
            anyhow::bail!("listener.accept_timeout must be greater than zero");
        }

        if listener.recv_buffer == 0 {
            anyhow::bail!("listener.recv_buffer must be greater than zero");
        }

        if let TurnTermination::Sentinel { marker } = &listener.termination {
            if marker.is_empty() {
                anyhow::bail!("sentinel termination requires a non-empty marker");
            }
        }

        if listener.mode == ListenerMode::Interactive
            && self.commands.source == CommandSourceKind::Script
            && self.commands.script.is_empty()
        {
            anyhow::bail!("script command source requires at least one command");
        }

        if listener.mode == ListenerMode::Stage && self.commands.payload.is_none() {
            anyhow::bail!("stage mode requires commands.payload");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}
