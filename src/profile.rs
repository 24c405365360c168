//! Catalog of the simulated devices
//!
//! Each profile fixes a device's kind, declared fields, value bounds, alert
//! weighting and tick cadence. Profiles only describe devices; [`crate::device`]
//! runs them.

use crate::state::StateDocument;
use crate::types::{
    ActuatorBehavior, AlertGate, DeviceKind, DeviceSpec, FieldRange, IntervalPolicy,
    SensorBehavior,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProfile {
    TemperatureSensor,
    MotionSensor,
    WindowSensor,
    DoorSensor,
    SmokeDetector,
    /// Publishes a single temperature-style reading to mark a campaign run boundary
    Divider,
    DoorActuator,
    FireAlarm,
    Thermostat,
    Shutter,
    LedBulb,
}

impl DeviceProfile {
    pub const ALL: [Self; 11] = [
        Self::TemperatureSensor,
        Self::MotionSensor,
        Self::WindowSensor,
        Self::DoorSensor,
        Self::SmokeDetector,
        Self::Divider,
        Self::DoorActuator,
        Self::FireAlarm,
        Self::Thermostat,
        Self::Shutter,
        Self::LedBulb,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TemperatureSensor => "temperature-sensor",
            Self::MotionSensor => "motion-sensor",
            Self::WindowSensor => "window-sensor",
            Self::DoorSensor => "door-sensor",
            Self::SmokeDetector => "smoke-detector",
            Self::Divider => "divider",
            Self::DoorActuator => "door-actuator",
            Self::FireAlarm => "fire-alarm",
            Self::Thermostat => "thermostat",
            Self::Shutter => "shutter",
            Self::LedBulb => "led-bulb",
        }
    }

    #[must_use]
    pub fn kind(self) -> DeviceKind {
        match self {
            Self::TemperatureSensor | Self::Divider => DeviceKind::Sensor(SensorBehavior {
                ranges: vec![
                    FieldRange::new("temperature", 10.0, 30.0),
                    FieldRange::new("humidity", 40.0, 90.0),
                    battery(),
                    link_quality(),
                ],
                gate: None,
            }),
            Self::MotionSensor => DeviceKind::Sensor(SensorBehavior {
                ranges: vec![battery(), link_quality()],
                gate: Some(AlertGate {
                    field: "alert".to_string(),
                    true_outcomes: 1,
                    outcomes: 8,
                    publish_when_false: true,
                    enabled_field: Some("on".to_string()),
                }),
            }),
            Self::WindowSensor | Self::DoorSensor => DeviceKind::Sensor(SensorBehavior {
                ranges: vec![battery(), link_quality()],
                gate: Some(AlertGate {
                    field: "open".to_string(),
                    true_outcomes: 1,
                    outcomes: 8,
                    publish_when_false: true,
                    enabled_field: None,
                }),
            }),
            Self::SmokeDetector => DeviceKind::Sensor(SensorBehavior {
                ranges: vec![battery(), link_quality()],
                gate: Some(AlertGate {
                    field: "alert".to_string(),
                    true_outcomes: 5,
                    outcomes: 8,
                    publish_when_false: false,
                    enabled_field: Some("on".to_string()),
                }),
            }),
            Self::DoorActuator => actuator("open", &[], None),
            Self::FireAlarm => actuator("alert", &[], Some((1, 10))),
            Self::Thermostat => actuator("active", &["state"], None),
            Self::Shutter => actuator("active", &["percentage"], Some((1, 10))),
            Self::LedBulb => actuator("on", &[], None),
        }
    }

    #[must_use]
    pub fn initial_state(self) -> StateDocument {
        let base = StateDocument::new()
            .with("battery", 0.0)
            .with("linkquality", 0.0);
        match self {
            Self::TemperatureSensor | Self::Divider => {
                base.with("temperature", 0.0).with("humidity", 0.0)
            }
            Self::MotionSensor | Self::SmokeDetector => base.with("on", true).with("alert", true),
            Self::WindowSensor | Self::DoorSensor | Self::DoorActuator => base.with("open", true),
            Self::FireAlarm => base.with("alert", true),
            Self::Thermostat => base.with("active", true).with("state", 0.0),
            Self::Shutter => base.with("active", true).with("percentage", 0.0),
            Self::LedBulb => base.with("on", true),
        }
    }

    #[must_use]
    pub fn default_interval(self) -> IntervalPolicy {
        match self {
            Self::TemperatureSensor | Self::Divider => IntervalPolicy::UniformSecs { min: 10, max: 15 },
            Self::MotionSensor => IntervalPolicy::UniformSecs { min: 30, max: 60 },
            Self::WindowSensor | Self::DoorSensor => IntervalPolicy::UniformSecs { min: 100, max: 200 },
            Self::SmokeDetector => IntervalPolicy::UniformSecs { min: 10, max: 20 },
            // actuators never tick
            Self::DoorActuator | Self::FireAlarm | Self::Thermostat | Self::Shutter | Self::LedBulb => {
                IntervalPolicy::UniformSecs { min: 0, max: 0 }
            }
        }
    }

    /// Builds the device spec for one instance of this profile
    #[must_use]
    pub fn spec(self, main_topic: &str, id: impl Into<String>) -> DeviceSpec {
        let spec = DeviceSpec::new(
            main_topic,
            id,
            self.kind(),
            self.default_interval(),
            self.initial_state(),
        );
        if self == Self::Divider {
            spec.with_max_ticks(1)
        } else {
            spec
        }
    }
}

fn battery() -> FieldRange {
    FieldRange::new("battery", 89.0, 92.0)
}

fn link_quality() -> FieldRange {
    FieldRange::new("linkquality", 50.0, 255.0)
}

fn actuator(primary: &str, dependents: &[&str], reply_delay_ms: Option<(u64, u64)>) -> DeviceKind {
    DeviceKind::Actuator(ActuatorBehavior {
        primary: primary.to_string(),
        dependents: dependents.iter().map(|d| (*d).to_string()).collect(),
        reply_delay_ms,
    })
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown device profile '{s}', expected one of: {}", known.join(", "))
            })
    }
}
