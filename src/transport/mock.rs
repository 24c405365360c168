//! In-memory transport for tests and dry runs
//!
//! [`MockTransport`] records every call, can be told to fail connects,
//! publishes or subscribes, and lets a test inject inbound messages through
//! [`MockTransport::simulate_message`]. [`MockNetwork`] hands out one mock per
//! device and keeps them reachable by client id.

use super::{Transport, TransportFactory, TransportResult};
use crate::types::{
    BrokerEndpoint, ConnectAck, CorrelationId, InboundMessage, OutboundPublish, PublishAck,
    SubscribeAck,
};
use mqtt5::{MqttError, QoS};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Record of a call made to the mock transport
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect {
        address: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        correlation_id: CorrelationId,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
    Disconnect,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

struct MockState {
    client_id: String,
    connected: AtomicBool,
    packet_id_counter: AtomicU16,
    /// Number of upcoming connect calls that fail
    connect_failures: AtomicU32,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    calls: Mutex<Vec<MockCall>>,
    subscriptions: RwLock<HashMap<String, MessageCallback>>,
}

impl MockTransport {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(MockState {
                client_id: client_id.into(),
                connected: AtomicBool::new(false),
                packet_id_counter: AtomicU16::new(0),
                connect_failures: AtomicU32::new(0),
                fail_publish: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                subscriptions: RwLock::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.state.client_id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Makes the next `count` connect calls fail
    pub fn fail_next_connects(&self, count: u32) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Gets all recorded calls
    pub async fn get_calls(&self) -> Vec<MockCall> {
        self.state.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.calls.lock().await.clear();
    }

    /// Successful and failed publish attempts, in order
    pub async fn publishes(&self) -> Vec<(String, Vec<u8>, CorrelationId)> {
        self.state
            .calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                MockCall::Publish {
                    topic,
                    payload,
                    correlation_id,
                    ..
                } => Some((topic.clone(), payload.clone(), correlation_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.state.subscriptions.read().await.keys().cloned().collect()
    }

    /// Delivers a message to the callback of a matching subscription
    ///
    /// # Errors
    ///
    /// Returns an error if no subscription matches `topic`
    pub async fn simulate_message(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        correlation_id: Option<CorrelationId>,
    ) -> TransportResult<()> {
        let callback = {
            let subscriptions = self.state.subscriptions.read().await;
            subscriptions
                .iter()
                .find(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, callback)| Arc::clone(callback))
        };

        let Some(callback) = callback else {
            return Err(MqttError::ProtocolError(format!(
                "No subscription found for topic: {topic}"
            )));
        };

        callback(InboundMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            correlation_id,
        });
        Ok(())
    }

    async fn record_call(&self, call: MockCall) {
        self.state.calls.lock().await.push(call);
    }

    fn next_packet_id(&self) -> u16 {
        self.state.packet_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Simple topic matching (supports + and # wildcards)
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl Transport for MockTransport {
    fn connect<'a>(
        &'a self,
        endpoint: &'a BrokerEndpoint,
    ) -> impl Future<Output = TransportResult<ConnectAck>> + Send + 'a {
        async move {
            self.record_call(MockCall::Connect {
                address: endpoint.url(),
            })
            .await;

            let failing = self
                .state
                .connect_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(MqttError::ConnectionError(
                    "Connection refused".to_string(),
                ));
            }

            self.state.connected.store(true, Ordering::SeqCst);
            Ok(ConnectAck {
                session_present: false,
            })
        }
    }

    fn publish(
        &self,
        request: OutboundPublish,
    ) -> impl Future<Output = TransportResult<PublishAck>> + Send + '_ {
        async move {
            debug!(
                client_id = %self.state.client_id,
                topic = %request.topic,
                correlation_id = %request.correlation_id,
                "Mock publish"
            );
            let qos = request.qos;
            self.record_call(MockCall::Publish {
                topic: request.topic,
                payload: request.payload,
                qos,
                correlation_id: request.correlation_id,
            })
            .await;

            if !self.is_connected() {
                return Err(MqttError::NotConnected);
            }
            if self.state.fail_publish.load(Ordering::SeqCst) {
                return Err(MqttError::ConnectionError("Broker unavailable".to_string()));
            }

            Ok(PublishAck {
                packet_id: match qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce | QoS::ExactlyOnce => Some(self.next_packet_id()),
                },
            })
        }
    }

    fn subscribe<'a, F>(
        &'a self,
        topic: &'a str,
        qos: QoS,
        on_message: F,
    ) -> impl Future<Output = TransportResult<SubscribeAck>> + Send + 'a
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        async move {
            self.record_call(MockCall::Subscribe {
                topic: topic.to_string(),
                qos,
            })
            .await;

            if !self.is_connected() {
                return Err(MqttError::NotConnected);
            }
            if self.state.fail_subscribe.load(Ordering::SeqCst) {
                return Err(MqttError::ConnectionError("Broker unavailable".to_string()));
            }

            self.state
                .subscriptions
                .write()
                .await
                .insert(topic.to_string(), Arc::new(on_message));

            Ok(SubscribeAck {
                packet_id: self.next_packet_id(),
                granted_qos: qos,
            })
        }
    }

    fn unsubscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> impl Future<Output = TransportResult<()>> + Send + 'a {
        async move {
            self.record_call(MockCall::Unsubscribe {
                topic: topic.to_string(),
            })
            .await;
            self.state.subscriptions.write().await.remove(topic);
            Ok(())
        }
    }

    fn disconnect(&self) -> impl Future<Output = TransportResult<()>> + Send + '_ {
        async move {
            self.record_call(MockCall::Disconnect).await;
            self.state.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}

/// Factory handing out one [`MockTransport`] per client id
#[derive(Clone, Default)]
pub struct MockNetwork {
    transports: Arc<std::sync::Mutex<HashMap<String, MockTransport>>>,
}

impl MockNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transport for `client_id`, creating it if needed
    ///
    /// Call this before spawning a device to configure failures up front.
    #[must_use]
    pub fn prepare(&self, client_id: &str) -> MockTransport {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(client_id.to_string())
            .or_insert_with(|| MockTransport::new(client_id))
            .clone()
    }

    #[must_use]
    pub fn transport(&self, client_id: &str) -> Option<MockTransport> {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .cloned()
    }

    #[must_use]
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl TransportFactory for MockNetwork {
    type Transport = MockTransport;

    fn create(&self, client_id: &str) -> Self::Transport {
        self.prepare(client_id)
    }
}
