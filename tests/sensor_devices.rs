//! Sensor worker behavior against the mock transport

mod common;

use common::{received, test_runner, test_settings, MAIN_TOPIC};
use mqtt5_devsim::{
    Device, DeviceProfile, DeviceSpec, DeviceState, IntervalPolicy, MockNetwork, MockTransport,
    Scalar,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn every_second(profile: DeviceProfile, id: &str) -> DeviceSpec {
    profile
        .spec(MAIN_TOPIC, id)
        .with_interval(IntervalPolicy::Fixed(Duration::from_secs(1)))
}

fn standalone(spec: DeviceSpec, seed: u64) -> Device<MockTransport> {
    let transport = MockTransport::new(spec.id.clone());
    Device::new(spec, transport, test_settings()).with_seed(seed)
}

#[tokio::test(start_paused = true)]
async fn test_temperature_sensor_publishes_every_interval() {
    let network = Arc::new(MockNetwork::new());
    let runner = test_runner(&network);

    let handle = runner.spawn(every_second(DeviceProfile::TemperatureSensor, "t1"));
    tokio::time::sleep(Duration::from_secs(3)).await;
    let reports = runner.shutdown(vec![handle]).await;

    let transport = network.transport("t1").unwrap();
    let publishes = received(&transport).await;
    assert!(
        (2..=4).contains(&publishes.len()),
        "expected 2..=4 publishes, got {}",
        publishes.len()
    );

    for publish in &publishes {
        assert_eq!(publish.topic, "evaluation/t1");
        assert_eq!(publish.document.len(), 4);
        for (field, min, max) in [
            ("temperature", 10.0, 30.0),
            ("humidity", 40.0, 90.0),
            ("battery", 89.0, 92.0),
            ("linkquality", 50.0, 255.0),
        ] {
            let value = publish.document.get(field).and_then(|v| v.as_f64()).unwrap();
            assert!((min..=max).contains(&value), "{field}={value}");
        }
    }

    let ids: HashSet<_> = publishes.iter().map(|p| p.correlation_id.clone()).collect();
    assert_eq!(ids.len(), publishes.len(), "correlation ids must be unique");

    assert_eq!(reports[0].final_state, DeviceState::Disconnected);
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_sensor_keeps_running_when_publishes_fail() {
    let network = Arc::new(MockNetwork::new());
    network.prepare("t1").set_publish_failure(true);
    let runner = test_runner(&network);

    let handle = runner.spawn(every_second(DeviceProfile::TemperatureSensor, "t1"));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    network.prepare("t1").set_publish_failure(false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let report = runner.shutdown(vec![handle]).await.remove(0);
    assert!(report.stats.publish_failures >= 2);
    assert!(report.stats.published >= 1);
    assert!(report.connect_error.is_none());
}

#[test]
fn test_motion_sensor_is_silent_while_off() {
    let profile = DeviceProfile::MotionSensor;
    let spec = DeviceSpec::new(
        MAIN_TOPIC,
        "m1",
        profile.kind(),
        profile.default_interval(),
        profile.initial_state().with("on", false),
    );
    let mut device = standalone(spec, 7);

    for _ in 0..20 {
        assert!(device.tick().is_none());
    }
    assert_eq!(device.stats().skipped, 20);
    assert_eq!(device.document().get("battery"), Some(Scalar::Number(0.0)));
}

#[test]
fn test_motion_sensor_reports_every_tick_while_on() {
    let mut device = standalone(DeviceProfile::MotionSensor.spec(MAIN_TOPIC, "m1"), 7);

    let readings: Vec<_> = (0..200).filter_map(|_| device.tick()).collect();
    assert_eq!(readings.len(), 200);

    let alerts = readings
        .iter()
        .filter(|doc| doc.get("alert") == Some(Scalar::Bool(true)))
        .count();
    // one in eight on average
    assert!(alerts > 5 && alerts < 60, "alerts={alerts}");
}

#[test]
fn test_smoke_detector_only_reports_alerts() {
    let mut device = standalone(DeviceProfile::SmokeDetector.spec(MAIN_TOPIC, "s1"), 11);

    let mut published = 0;
    for _ in 0..200 {
        if let Some(doc) = device.tick() {
            published += 1;
            assert_eq!(doc.get("alert"), Some(Scalar::Bool(true)));
            assert_eq!(doc.get("on"), Some(Scalar::Bool(true)));
        }
    }
    assert!(published > 80 && published < 170, "published={published}");
    assert_eq!(device.stats().skipped, 200 - published);
}

#[test]
fn test_door_and_window_sensors_report_open_both_ways() {
    for profile in [DeviceProfile::DoorSensor, DeviceProfile::WindowSensor] {
        let mut device = standalone(profile.spec(MAIN_TOPIC, "w1"), 3);
        let values: HashSet<bool> = (0..100)
            .filter_map(|_| device.tick())
            .filter_map(|doc| doc.get("open").and_then(|v| v.as_bool()))
            .collect();
        assert_eq!(values.len(), 2, "{profile} never flipped open");
    }
}

#[tokio::test(start_paused = true)]
async fn test_divider_publishes_exactly_once() {
    let network = Arc::new(MockNetwork::new());
    let runner = test_runner(&network);

    // the divider ends on its own after a single tick
    let handle = runner.spawn(DeviceProfile::Divider.spec(MAIN_TOPIC, "DIVIDER"));
    let report = handle.join().await.unwrap();
    assert_eq!(report.final_state, DeviceState::Disconnected);

    assert_eq!(report.stats.published, 1);
    let transport = network.transport("DIVIDER").unwrap();
    let publishes = received(&transport).await;
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].topic, "evaluation/DIVIDER");
}

#[test]
fn test_actuator_never_ticks() {
    let spec = DeviceProfile::LedBulb.spec(MAIN_TOPIC, "l1");
    assert!(spec.kind.is_actuator());
    let mut device = standalone(spec, 1);
    assert!(device.tick().is_none());
    assert_eq!(device.stats().ticks, 0);
}
