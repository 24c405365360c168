//! Simulated device
//!
//! A [`Device`] owns its [`StateDocument`], its transport and its RNG, and is
//! driven by exactly one worker task through [`Device::run`]:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Running | AwaitingCommand
//!              -> Disconnecting -> Disconnected
//! ```
//!
//! Sensors tick on their own cadence. Actuators subscribe to their command
//! topic and only publish in reply to a command. Inbound commands are handed
//! from the transport callback to the worker over a channel, so the document
//! is never touched from two places at once.

use crate::error::{Result, SimError};
use crate::retry::{RetryPolicy, RetryState};
use crate::sampling;
use crate::signal::StopSignal;
use crate::state::StateDocument;
use crate::transport::Transport;
use crate::types::{
    ActuatorBehavior, BrokerEndpoint, ConnectAck, CorrelationId, DeviceKind, DeviceSpec,
    DeviceState, InboundMessage, OutboundPublish, PublishAck, SensorBehavior,
};
use mqtt5::QoS;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// Delay between attempts to re-establish a failed command subscription
const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5);

/// Commands queued for the worker before new ones are dropped
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Connection and delivery settings shared by every device of a fleet
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub endpoint: BrokerEndpoint,
    pub publish_qos: QoS,
    pub subscribe_qos: QoS,
    pub retry: RetryPolicy,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            endpoint: BrokerEndpoint::default(),
            publish_qos: QoS::AtMostOnce,
            subscribe_qos: QoS::ExactlyOnce,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-device counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub ticks: u64,
    pub published: u64,
    pub publish_failures: u64,
    /// Ticks whose alert gate suppressed the publish
    pub skipped: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    /// Commands dropped because the worker's queue was full
    pub commands_dropped: u64,
}

/// Outcome of one device worker
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub id: String,
    pub final_state: DeviceState,
    pub document: StateDocument,
    pub stats: DeviceStats,
    /// Set when the device never got a broker session
    pub connect_error: Option<String>,
}

pub struct Device<T: Transport> {
    spec: DeviceSpec,
    document: StateDocument,
    transport: T,
    settings: Arc<DeviceSettings>,
    lifecycle: watch::Sender<DeviceState>,
    rng: StdRng,
    inbox_tx: mpsc::Sender<InboundMessage>,
    inbox: Option<mpsc::Receiver<InboundMessage>>,
    dropped: Arc<AtomicU64>,
    subscribed: bool,
    stats: DeviceStats,
}

impl<T: Transport> Device<T> {
    /// Creates a device in the `Disconnected` state; nothing is sent yet
    pub fn new(spec: DeviceSpec, transport: T, settings: Arc<DeviceSettings>) -> Self {
        let (lifecycle, _) = watch::channel(DeviceState::Disconnected);
        let (inbox_tx, inbox) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        Self {
            document: spec.initial_state.clone(),
            spec,
            transport,
            settings,
            lifecycle,
            rng: StdRng::from_entropy(),
            inbox_tx,
            inbox: Some(inbox),
            dropped: Arc::new(AtomicU64::new(0)),
            subscribed: false,
            stats: DeviceStats::default(),
        }
    }

    /// Replaces the entropy-seeded RNG with a deterministic one
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    #[must_use]
    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        *self.lifecycle.borrow()
    }

    #[must_use]
    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            commands_dropped: self.dropped.load(Ordering::Relaxed),
            ..self.stats
        }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Watches lifecycle transitions from outside the worker
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.lifecycle.subscribe()
    }

    fn transition(&self, next: DeviceState) {
        let previous = self.lifecycle.send_replace(next);
        if previous != next {
            debug!(device_id = %self.spec.id, from = %previous, to = %next, "Device state changed");
        }
    }

    /// Connects and enters the kind-specific operating state
    ///
    /// Sensors move to `Running`. Actuators subscribe to their command topic
    /// and move to `AwaitingCommand`; a failed subscribe is logged and retried
    /// while the device waits.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::ConnectFailure`] once the retry policy is exhausted
    /// or the stop signal is raised during backoff. The device is then
    /// `Disconnected`.
    pub async fn start(&mut self, stop: &StopSignal) -> Result<ConnectAck> {
        let ack = self.connect(stop).await?;
        match self.spec.kind {
            DeviceKind::Sensor(_) => self.transition(DeviceState::Running),
            DeviceKind::Actuator(_) => {
                if let Err(e) = self.subscribe_commands().await {
                    warn!(device_id = %self.spec.id, error = %e, "Command subscription failed, will retry");
                }
                self.transition(DeviceState::AwaitingCommand);
            }
        }
        Ok(ack)
    }

    async fn connect(&mut self, stop: &StopSignal) -> Result<ConnectAck> {
        self.transition(DeviceState::Connecting);
        let settings = Arc::clone(&self.settings);
        let mut retry = RetryState::new();

        loop {
            retry.record_attempt();
            match self.transport.connect(&settings.endpoint).await {
                Ok(ack) => {
                    info!(
                        device_id = %self.spec.id,
                        broker = %settings.endpoint.url(),
                        session_present = ack.session_present,
                        "Device connected"
                    );
                    self.transition(DeviceState::Connected);
                    return Ok(ack);
                }
                Err(source) => {
                    warn!(
                        device_id = %self.spec.id,
                        attempt = retry.attempts(),
                        error = %source,
                        "Failed to connect"
                    );
                    let keep_trying = retry.should_retry(&settings.retry)
                        && backoff(retry.next_delay(&settings.retry), stop).await;
                    if !keep_trying {
                        self.transition(DeviceState::Disconnected);
                        return Err(SimError::ConnectFailure {
                            device: self.spec.id.clone(),
                            attempts: retry.attempts(),
                            source,
                        });
                    }
                }
            }
        }
    }

    async fn subscribe_commands(&mut self) -> Result<()> {
        let tx = self.inbox_tx.clone();
        let dropped = Arc::clone(&self.dropped);
        let device_id = self.spec.id.clone();
        let topic = self.spec.command_topic.clone();
        let ack = self
            .transport
            .subscribe(&topic, self.settings.subscribe_qos, move |msg| {
                match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(msg)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(device_id = %device_id, topic = %msg.topic, "Command queue full, dropping command");
                    }
                    // the worker has finished
                    Err(TrySendError::Closed(_)) => {}
                }
            })
            .await
            .map_err(|source| SimError::SubscribeFailure {
                device: self.spec.id.clone(),
                topic: topic.clone(),
                source,
            })?;

        self.subscribed = true;
        info!(
            device_id = %self.spec.id,
            topic = %topic,
            granted_qos = ?ack.granted_qos,
            packet_id = ack.packet_id,
            "Subscribed to command topic"
        );
        Ok(())
    }

    /// Draws the next sensor reading
    ///
    /// Returns the document to publish, or `None` when this tick publishes
    /// nothing: the device is an actuator, its enabling field is off, or its
    /// alert gate came out false and the device only reports alerts.
    pub fn tick(&mut self) -> Option<StateDocument> {
        let DeviceKind::Sensor(SensorBehavior { ranges, gate }) = &self.spec.kind else {
            return None;
        };
        self.stats.ticks += 1;

        if let Some(enabled) = gate.as_ref().and_then(|g| g.enabled_field.as_deref()) {
            if self.document.get(enabled).and_then(|v| v.as_bool()) != Some(true) {
                self.stats.skipped += 1;
                return None;
            }
        }

        for range in ranges {
            let value = sampling::draw_range(&mut self.rng, range);
            self.document.set(&range.field, value.into());
        }

        if let Some(gate) = gate {
            let alert = sampling::draw_gate(&mut self.rng, gate);
            self.document.set(&gate.field, alert.into());
            if !alert && !gate.publish_when_false {
                self.stats.skipped += 1;
                return None;
            }
        }

        Some(self.document.clone())
    }

    /// Runs one sensor tick and publishes its reading, if any
    ///
    /// A failed publish is counted and logged; the next tick simply tries again.
    pub async fn tick_and_publish(&mut self) -> Option<PublishAck> {
        self.tick()?;
        match self.publish_document(CorrelationId::generate()).await {
            Ok(ack) => Some(ack),
            Err(e) => {
                warn!(device_id = %self.spec.id, error = %e, "Publish failed");
                None
            }
        }
    }

    /// Applies an inbound command and echoes the full document
    ///
    /// The reply carries the command's correlation id, taken from the message
    /// properties or, failing that, a `correlationId` string in the payload.
    /// Returns `Ok(None)` when called on a sensor.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::MalformedCommandPayload`] when the command is
    /// rejected (no reply is sent and the document is unchanged), or
    /// [`SimError::PublishFailure`] when the reply could not be published.
    pub async fn handle_command(&mut self, message: InboundMessage) -> Result<Option<PublishAck>> {
        let DeviceKind::Actuator(behavior) = &self.spec.kind else {
            return Ok(None);
        };
        let ActuatorBehavior {
            reply_delay_ms, ..
        } = behavior;

        if let Some(range) = *reply_delay_ms {
            tokio::time::sleep(sampling::draw_millis(&mut self.rng, range)).await;
        }

        if let Err(e) = self.document.apply_command(behavior, &message.payload) {
            self.stats.commands_rejected += 1;
            warn!(
                device_id = %self.spec.id,
                topic = %message.topic,
                error = %e,
                "Dropping command"
            );
            return Err(e);
        }
        self.stats.commands_applied += 1;
        debug!(
            device_id = %self.spec.id,
            payload = %String::from_utf8_lossy(&message.payload),
            "Applied command"
        );

        let correlation_id = message
            .correlation_id
            .or_else(|| payload_correlation_id(&message.payload))
            .unwrap_or_else(|| {
                warn!(device_id = %self.spec.id, "Command carries no correlation id, replying with a fresh one");
                CorrelationId::generate()
            });

        match self.publish_document(correlation_id).await {
            Ok(ack) => Ok(Some(ack)),
            Err(e) => {
                warn!(device_id = %self.spec.id, error = %e, "Reply publish failed");
                Err(e)
            }
        }
    }

    async fn publish_document(&mut self, correlation_id: CorrelationId) -> Result<PublishAck> {
        let request = OutboundPublish {
            topic: self.spec.topic.clone(),
            payload: self.document.to_payload()?,
            qos: self.settings.publish_qos,
            correlation_id,
        };

        match self.transport.publish(request).await {
            Ok(ack) => {
                self.stats.published += 1;
                debug!(device_id = %self.spec.id, packet_id = ?ack.packet_id, "Published");
                Ok(ack)
            }
            Err(source) => {
                self.stats.publish_failures += 1;
                Err(SimError::PublishFailure {
                    device: self.spec.id.clone(),
                    topic: self.spec.topic.clone(),
                    source,
                })
            }
        }
    }

    /// Leaves the broker: unsubscribes actuators and disconnects
    pub async fn stop(&mut self) {
        if self.state() == DeviceState::Disconnected {
            return;
        }
        self.transition(DeviceState::Disconnecting);

        if self.subscribed {
            if let Err(e) = self.transport.unsubscribe(&self.spec.command_topic).await {
                warn!(device_id = %self.spec.id, error = %e, "Unsubscribe failed");
            }
            self.subscribed = false;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(device_id = %self.spec.id, error = %e, "Disconnect failed");
        }

        self.transition(DeviceState::Disconnected);
        info!(device_id = %self.spec.id, "Device disconnected");
    }

    /// Full worker lifecycle: connect, loop until stopped, disconnect
    ///
    /// The stop signal is checked at the top of every iteration and also
    /// interrupts the sleep between ticks, so at most the tick in progress
    /// completes after it is raised.
    #[instrument(skip_all, fields(device_id = %self.spec.id))]
    pub async fn run(mut self, stop: StopSignal) -> DeviceReport {
        if let Err(e) = self.start(&stop).await {
            error!(device_id = %self.spec.id, error = %e, "Device giving up");
            return self.into_report(Some(e.to_string()));
        }

        if self.spec.kind.is_sensor() {
            self.sensor_loop(&stop).await;
        } else {
            self.actuator_loop(&stop).await;
        }

        self.stop().await;
        self.into_report(None)
    }

    async fn sensor_loop(&mut self, stop: &StopSignal) {
        while !stop.is_raised() && !self.tick_limit_reached() {
            self.tick_and_publish().await;
            if self.tick_limit_reached() {
                break;
            }

            let delay = sampling::draw_interval(&mut self.rng, self.spec.interval);
            if !backoff(delay, stop).await {
                break;
            }
        }
    }

    async fn actuator_loop(&mut self, stop: &StopSignal) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };

        while !stop.is_raised() {
            let resubscribe = (!self.subscribed).then_some(RESUBSCRIBE_INTERVAL);
            tokio::select! {
                biased;
                () = stop.raised() => break,
                message = inbox.recv() => match message {
                    // rejected commands and failed replies are logged by handle_command
                    Some(message) => { let _ = self.handle_command(message).await; }
                    None => break,
                },
                () = sleep_or_pending(resubscribe) => {
                    if let Err(e) = self.subscribe_commands().await {
                        warn!(device_id = %self.spec.id, error = %e, "Command subscription failed, will retry");
                    }
                }
            }
        }

        self.inbox = Some(inbox);
    }

    fn tick_limit_reached(&self) -> bool {
        self.spec
            .max_ticks
            .is_some_and(|max| self.stats.ticks >= max)
    }

    fn into_report(self, connect_error: Option<String>) -> DeviceReport {
        DeviceReport {
            final_state: self.state(),
            stats: self.stats(),
            id: self.spec.id,
            document: self.document,
            connect_error,
        }
    }
}

/// Sleeps for `delay` unless stopped first; returns false if the stop won
async fn backoff(delay: Duration, stop: &StopSignal) -> bool {
    tokio::select! {
        biased;
        () = stop.raised() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

fn payload_correlation_id(payload: &[u8]) -> Option<CorrelationId> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("correlationId")
        .and_then(serde_json::Value::as_str)
        .map(CorrelationId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DeviceProfile;
    use crate::transport::{MockCall, MockTransport};

    fn device(profile: DeviceProfile, id: &str) -> Device<MockTransport> {
        Device::new(
            profile.spec("evaluation", id),
            MockTransport::new(id),
            Arc::new(DeviceSettings::default()),
        )
        .with_seed(42)
    }

    #[test]
    fn test_new_device_is_disconnected() {
        let d = device(DeviceProfile::DoorActuator, "d1");
        assert_eq!(d.state(), DeviceState::Disconnected);
        assert_eq!(d.document(), &DeviceProfile::DoorActuator.initial_state());
    }

    #[test]
    fn test_actuator_never_ticks() {
        let mut d = device(DeviceProfile::LedBulb, "l1");
        assert!(d.tick().is_none());
        assert_eq!(d.stats().ticks, 0);
    }

    #[test]
    fn test_smoke_detector_only_reports_alerts() {
        let mut d = device(DeviceProfile::SmokeDetector, "s1");
        for _ in 0..200 {
            if let Some(doc) = d.tick() {
                assert_eq!(doc.get("alert").and_then(|v| v.as_bool()), Some(true));
            }
        }
        let stats = d.stats();
        assert_eq!(stats.ticks, 200);
        assert!(stats.skipped > 0);
    }

    #[test]
    fn test_disabled_motion_sensor_stays_silent() {
        let mut spec = DeviceProfile::MotionSensor.spec("evaluation", "m1");
        spec.initial_state.set("on", false.into());
        let mut d = Device::new(spec, MockTransport::new("m1"), Arc::new(DeviceSettings::default()));

        for _ in 0..20 {
            assert!(d.tick().is_none());
        }
        assert_eq!(d.stats().skipped, 20);
    }

    #[tokio::test]
    async fn test_start_moves_sensor_to_running() {
        let mut d = device(DeviceProfile::TemperatureSensor, "t1");
        d.start(&StopSignal::new()).await.unwrap();
        assert_eq!(d.state(), DeviceState::Running);
        assert!(d.transport().get_calls().await.iter().all(|c| !matches!(c, MockCall::Subscribe { .. })));
    }

    #[tokio::test]
    async fn test_start_subscribes_actuator() {
        let mut d = device(DeviceProfile::DoorActuator, "d1");
        d.start(&StopSignal::new()).await.unwrap();

        assert_eq!(d.state(), DeviceState::AwaitingCommand);
        assert_eq!(
            d.transport().subscribed_topics().await,
            vec!["evaluation/d1/toggleState".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_and_disconnects() {
        let mut d = device(DeviceProfile::DoorActuator, "d1");
        d.start(&StopSignal::new()).await.unwrap();
        d.stop().await;

        assert_eq!(d.state(), DeviceState::Disconnected);
        assert!(!d.transport().is_connected());
        let calls = d.transport().get_calls().await;
        assert!(matches!(
            calls[calls.len() - 2],
            MockCall::Unsubscribe { ref topic } if topic == "evaluation/d1/toggleState"
        ));
        assert_eq!(calls[calls.len() - 1], MockCall::Disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_exhausts_retry_policy() {
        let mut d = device(DeviceProfile::TemperatureSensor, "t1");
        d.transport().fail_next_connects(10);

        let err = d.start(&StopSignal::new()).await.unwrap_err();
        assert!(matches!(err, SimError::ConnectFailure { attempts: 3, .. }));
        assert_eq!(d.state(), DeviceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_recovers_within_retry_budget() {
        let mut d = device(DeviceProfile::TemperatureSensor, "t1");
        d.transport().fail_next_connects(2);

        d.start(&StopSignal::new()).await.unwrap();
        assert_eq!(d.state(), DeviceState::Running);
    }

    #[tokio::test]
    async fn test_failed_reply_is_counted_and_returned() {
        let mut d = device(DeviceProfile::DoorActuator, "d1");
        d.start(&StopSignal::new()).await.unwrap();
        d.transport().set_publish_failure(true);

        let message = InboundMessage {
            topic: "evaluation/d1/toggleState".to_string(),
            payload: br#"{"open": false}"#.to_vec(),
            correlation_id: Some(CorrelationId::from("abc")),
        };
        let err = d.handle_command(message.clone()).await.unwrap_err();
        assert!(matches!(err, SimError::PublishFailure { .. }));
        assert_eq!(d.stats().publish_failures, 1);
        assert_eq!(d.stats().commands_applied, 1);

        d.transport().set_publish_failure(false);
        assert!(d.handle_command(message).await.unwrap().is_some());
        assert_eq!(d.stats().published, 1);
    }

    #[tokio::test]
    async fn test_full_command_queue_drops_commands() {
        let mut d = device(DeviceProfile::LedBulb, "l1");
        d.start(&StopSignal::new()).await.unwrap();

        // nothing drains the queue until the worker loop runs
        for _ in 0..COMMAND_QUEUE_CAPACITY + 6 {
            d.transport()
                .simulate_message("evaluation/l1/toggleState", br#"{"on": false}"#.to_vec(), None)
                .await
                .unwrap();
        }
        assert_eq!(d.stats().commands_dropped, 6);
    }

    #[test]
    fn test_payload_correlation_id() {
        assert_eq!(
            payload_correlation_id(br#"{"open": false, "correlationId": "abc"}"#),
            Some(CorrelationId::from("abc"))
        );
        assert_eq!(payload_correlation_id(br#"{"correlationId": 5}"#), None);
        assert_eq!(payload_correlation_id(b"garbage"), None);
    }
}
