use crate::state::StateDocument;
use mqtt5::QoS;
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// Inclusive numeric bounds for a sensor field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRange {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Weighted boolean draw that decides an alert field, and whether to publish
#[derive(Debug, Clone, PartialEq)]
pub struct AlertGate {
    /// Field receiving the drawn value
    pub field: String,
    /// How many of `outcomes` equally likely outcomes are `true`
    pub true_outcomes: u32,
    pub outcomes: u32,
    /// Publish even when the draw comes out `false`
    pub publish_when_false: bool,
    /// Boolean field that must be `true` for the gate to be drawn at all
    pub enabled_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorBehavior {
    pub ranges: Vec<FieldRange>,
    pub gate: Option<AlertGate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorBehavior {
    /// Field every command must carry
    pub primary: String,
    /// Fields applied only when the command sets `primary` to `true`
    pub dependents: Vec<String>,
    /// Simulated processing latency before replying, in milliseconds
    pub reply_delay_ms: Option<(u64, u64)>,
}

/// Sensors push unsolicited readings; actuators stay silent until commanded
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    Sensor(SensorBehavior),
    Actuator(ActuatorBehavior),
}

impl DeviceKind {
    #[must_use]
    pub fn is_sensor(&self) -> bool {
        matches!(self, Self::Sensor(_))
    }

    #[must_use]
    pub fn is_actuator(&self) -> bool {
        matches!(self, Self::Actuator(_))
    }
}

/// Time between two sensor ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalPolicy {
    Fixed(Duration),
    /// Whole seconds drawn uniformly from `min..=max`
    UniformSecs { min: u64, max: u64 },
}

/// Immutable description of one simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub id: String,
    pub kind: DeviceKind,
    /// Telemetry topic, `{main_topic}/{id}`
    pub topic: String,
    /// Command topic actuators subscribe to, `{main_topic}/{id}/toggleState`
    pub command_topic: String,
    pub interval: IntervalPolicy,
    pub initial_state: StateDocument,
    /// Stop after this many ticks, `None` runs until stopped
    pub max_ticks: Option<u64>,
}

impl DeviceSpec {
    #[must_use]
    pub fn new(
        main_topic: &str,
        id: impl Into<String>,
        kind: DeviceKind,
        interval: IntervalPolicy,
        initial_state: StateDocument,
    ) -> Self {
        let id = id.into();
        let topic = telemetry_topic(main_topic, &id);
        let command_topic = command_topic(main_topic, &id);
        Self {
            id,
            kind,
            topic,
            command_topic,
            interval,
            initial_state,
            max_ticks: None,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: IntervalPolicy) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }
}

#[must_use]
pub fn telemetry_topic(main_topic: &str, device_id: &str) -> String {
    format!("{}/{device_id}", main_topic.trim_end_matches('/'))
}

#[must_use]
pub fn command_topic(main_topic: &str, device_id: &str) -> String {
    format!("{}/toggleState", telemetry_topic(main_topic, device_id))
}

/// Broker address and session keepalive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
}

impl BrokerEndpoint {
    #[must_use]
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Opaque token linking a command to the reply it triggered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Vec<u8>);

impl CorrelationId {
    /// Generates a fresh, unique identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().into_bytes())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for CorrelationId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A message delivered by the transport to a subscribed device
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub correlation_id: Option<CorrelationId>,
}

/// Everything needed to hand one publish to the transport
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAck {
    pub session_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// `None` for `QoS` 0
    pub packet_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeAck {
    pub packet_id: u16,
    pub granted_qos: QoS,
}

/// Device lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    Running,
    AwaitingCommand,
    Disconnecting,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::AwaitingCommand => "awaiting-command",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
