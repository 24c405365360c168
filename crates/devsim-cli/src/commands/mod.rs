pub mod campaign_cmd;
pub mod fleet_cmd;

use anyhow::{Context, Result};
use clap::Args;
use mqtt5_devsim::SimulatorConfig;
use std::path::PathBuf;
use tracing::{info, warn};

/// Broker and topic options shared by every command
#[derive(Args, Debug, Clone)]
pub struct SimulatorArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long, short = 'H')]
    pub host: Option<String>,

    /// MQTT broker port
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Topic prefix for every device
    #[arg(long, short)]
    pub topic: Option<String>,

    /// Keep alive interval in seconds
    #[arg(long, short = 'k')]
    pub keep_alive: Option<u64>,

    /// Use an in-memory transport instead of a broker
    #[arg(long)]
    pub dry_run: bool,
}

impl SimulatorArgs {
    /// Loads the configuration file, if any, and applies flag overrides
    pub fn resolve(&self) -> Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => SimulatorConfig::default(),
        };

        if let Some(host) = &self.host {
            config.broker.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(topic) = &self.topic {
            config.main_topic = topic.trim_end_matches('/').to_string();
        }
        if let Some(keep_alive) = self.keep_alive {
            config.broker.keep_alive_secs = keep_alive;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Resolves on Ctrl+C; a failing signal handler counts as an interrupt
pub async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => warn!(error = %err, "Unable to listen for shutdown signal, shutting down"),
    }
}
