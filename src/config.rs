//! Simulator configuration
//!
//! Every field has a compiled-in default, so an empty JSON object (or no file
//! at all) yields a working configuration. Durations are whole seconds or
//! milliseconds to keep the file format flat.

use crate::campaign::{Campaign, CampaignConfig};
use crate::device::DeviceSettings;
use crate::error::{Result, SimError};
use crate::retry::RetryPolicy;
use crate::types::BrokerEndpoint;
use mqtt5::QoS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    pub broker: BrokerConfig,
    /// Prefix of every device topic
    pub main_topic: String,
    pub publish_qos: u8,
    pub subscribe_qos: u8,
    pub retry: RetryConfig,
    pub campaign: CampaignSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignSettings {
    pub device_count: usize,
    pub initial_rate: u32,
    pub rate_step: u32,
    pub message_floor: u64,
    pub message_target: u64,
    pub message_step: u64,
    pub run_duration_secs: u64,
    pub settle_secs: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            main_topic: "evaluation".to_string(),
            publish_qos: 0,
            subscribe_qos: 2,
            retry: RetryConfig::default(),
            campaign: CampaignSettings::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: u64::try_from(policy.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_factor: policy.backoff_factor,
        }
    }
}

impl Default for CampaignSettings {
    fn default() -> Self {
        let campaign = CampaignConfig::default();
        Self {
            device_count: campaign.device_count,
            initial_rate: campaign.initial_rate,
            rate_step: campaign.rate_step,
            message_floor: campaign.message_floor,
            message_target: campaign.message_target,
            message_step: campaign.message_step,
            run_duration_secs: campaign.run_duration.as_secs(),
            settle_secs: campaign.settle.as_secs(),
        }
    }
}

impl SimulatorConfig {
    /// Loads and validates a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON for this
    /// schema, or fails [`SimulatorConfig::validate`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SimError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.broker.host.is_empty() {
            return Err(SimError::Config("broker.host must not be empty".to_string()));
        }
        if self.main_topic.is_empty() || self.main_topic.contains(['+', '#']) {
            return Err(SimError::Config(format!(
                "main_topic '{}' must be a non-empty topic without wildcards",
                self.main_topic
            )));
        }
        for (name, qos) in [
            ("publish_qos", self.publish_qos),
            ("subscribe_qos", self.subscribe_qos),
        ] {
            if qos > 2 {
                return Err(SimError::Config(format!("{name} must be 0, 1, or 2, got {qos}")));
            }
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(SimError::Config("retry.backoff_factor must be at least 1.0".to_string()));
        }
        Campaign::planned_runs(&self.campaign_config())?;
        Ok(())
    }

    #[must_use]
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            host: self.broker.host.clone(),
            port: self.broker.port,
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
        }
    }

    #[must_use]
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            endpoint: self.endpoint(),
            publish_qos: QoS::from(self.publish_qos),
            subscribe_qos: QoS::from(self.subscribe_qos),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                backoff_factor: self.retry.backoff_factor,
            },
        }
    }

    #[must_use]
    pub fn campaign_config(&self) -> CampaignConfig {
        let c = &self.campaign;
        CampaignConfig {
            device_count: c.device_count,
            initial_rate: c.initial_rate,
            rate_step: c.rate_step,
            message_floor: c.message_floor,
            message_target: c.message_target,
            message_step: c.message_step,
            run_duration: Duration::from_secs(c.run_duration_secs),
            settle: Duration::from_secs(c.settle_secs),
        }
    }
}
