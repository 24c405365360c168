//! Common test utilities for device and campaign scenarios

use mqtt5_devsim::{
    CorrelationId, DeviceSettings, MockNetwork, MockTransport, RetryPolicy, Runner, StateDocument,
};
use std::sync::Arc;
use std::time::Duration;

pub const MAIN_TOPIC: &str = "evaluation";

/// One publish seen by a mock transport
#[derive(Debug, Clone)]
pub struct ReceivedPublish {
    pub topic: String,
    pub document: StateDocument,
    pub correlation_id: CorrelationId,
}

/// Upper bound on how long helpers wait for a worker to catch up
#[allow(dead_code)]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings with a short retry schedule so connect failures resolve quickly
pub fn test_settings() -> Arc<DeviceSettings> {
    Arc::new(DeviceSettings {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        },
        ..DeviceSettings::default()
    })
}

#[allow(dead_code)]
pub fn test_runner(network: &Arc<MockNetwork>) -> Runner<MockNetwork> {
    Runner::new(Arc::clone(network), test_settings())
}

/// Polls the mock until it has recorded at least `count` publishes
///
/// Returns whatever was recorded once [`DEFAULT_TIMEOUT`] elapses.
#[allow(dead_code)]
pub async fn wait_for_publishes(transport: &MockTransport, count: usize) -> Vec<ReceivedPublish> {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let publishes = received(transport).await;
        if publishes.len() >= count || tokio::time::Instant::now() >= deadline {
            return publishes;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Publishes recorded by the mock, with decoded payloads
pub async fn received(transport: &MockTransport) -> Vec<ReceivedPublish> {
    transport
        .publishes()
        .await
        .into_iter()
        .map(|(topic, payload, correlation_id)| ReceivedPublish {
            document: StateDocument::from_payload(&payload).expect("payload is a state document"),
            topic,
            correlation_id,
        })
        .collect()
}

#[allow(dead_code)]
pub fn correlation(value: &str) -> CorrelationId {
    CorrelationId::from(value)
}
