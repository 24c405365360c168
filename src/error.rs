use mqtt5::MqttError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

/// Simulator errors
///
/// None of these are fatal to a running fleet. A device that hits one logs it
/// and either carries on with its next tick or, for connect failures, ends
/// its own worker while the rest of the fleet keeps running.
///
/// # Error Categories
///
/// - **Transport**: `ConnectFailure`, `PublishFailure`, `SubscribeFailure`
/// - **Inbound data**: `MalformedCommandPayload`
/// - **Setup**: `Config`, `Io`, `Worker`
#[derive(Error, Debug)]
pub enum SimError {
    #[error("device {device} failed to connect after {attempts} attempt(s): {source}")]
    ConnectFailure {
        device: String,
        attempts: u32,
        #[source]
        source: MqttError,
    },

    #[error("device {device} failed to publish to {topic}: {source}")]
    PublishFailure {
        device: String,
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("device {device} failed to subscribe to {topic}: {source}")]
    SubscribeFailure {
        device: String,
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("malformed command payload: {0}")]
    MalformedCommandPayload(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device worker {device} aborted: {reason}")]
    Worker { device: String, reason: String },
}

impl SimError {
    /// Returns true for errors a device survives by trying again on its next tick
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PublishFailure { .. } | Self::SubscribeFailure { .. }
        )
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedCommandPayload(err.to_string())
    }
}
