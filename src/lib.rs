//! # MQTT v5.0 Device Fleet Simulator
//!
//! Simulates a fleet of IoT devices (temperature, motion, window and door
//! sensors, smoke detectors, and actuators such as door locks, thermostats,
//! shutters, LED bulbs and fire alarms) talking to an MQTT broker, for load
//! testing that broker.
//!
//! Each device runs in its own tokio task. Sensors publish synthetic readings
//! on their own cadence; actuators subscribe to `{topic}/toggleState`, apply
//! commands to their state and echo the result with the command's
//! correlation id.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqtt5_devsim::{DeviceProfile, DeviceSettings, MqttTransportFactory, Runner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new(
//!         Arc::new(MqttTransportFactory),
//!         Arc::new(DeviceSettings::default()),
//!     );
//!
//!     let handles = vec![
//!         runner.spawn(DeviceProfile::TemperatureSensor.spec("evaluation", "t1")),
//!         runner.spawn(DeviceProfile::DoorActuator.spec("evaluation", "d1")),
//!     ];
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     runner.shutdown(handles).await;
//! }
//! ```

#![warn(clippy::pedantic)]

pub mod campaign;
pub mod config;
pub mod device;
pub mod error;
pub mod profile;
pub mod retry;
pub mod runner;
pub mod sampling;
pub mod signal;
pub mod state;
pub mod transport;
pub mod types;

pub use campaign::{Campaign, CampaignConfig, CampaignController, CampaignReport, RunConfig, RunReport};
pub use config::SimulatorConfig;
pub use device::{Device, DeviceReport, DeviceSettings, DeviceStats};
pub use error::{Result, SimError};
pub use profile::DeviceProfile;
pub use retry::RetryPolicy;
pub use runner::{drain, DeviceHandle, Runner};
pub use signal::StopSignal;
pub use state::{Scalar, StateDocument};
pub use transport::{
    MockCall, MockNetwork, MockTransport, MqttTransport, MqttTransportFactory, Transport,
    TransportFactory,
};
pub use types::{
    BrokerEndpoint, CorrelationId, DeviceKind, DeviceSpec, DeviceState, InboundMessage,
    IntervalPolicy,
};

pub use mqtt5::QoS;
