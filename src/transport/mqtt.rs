//! [`Transport`] backed by the `mqtt5` client

use super::{Transport, TransportFactory, TransportResult};
use crate::types::{
    BrokerEndpoint, ConnectAck, CorrelationId, InboundMessage, OutboundPublish, PublishAck,
    SubscribeAck,
};
use mqtt5::{ConnectOptions, ConnectionEvent, MqttClient, PublishOptions, QoS, SubscribeOptions};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub struct MqttTransport {
    client: MqttClient,
    client_id: String,
    watching: AtomicBool,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            client: MqttClient::new(client_id.clone()),
            client_id,
            watching: AtomicBool::new(false),
        }
    }

    /// Logs broker-side disconnects; registered once per client
    async fn watch_connection(&self) -> TransportResult<()> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let client_id = self.client_id.clone();
        self.client
            .on_connection_event(move |event| match event {
                ConnectionEvent::Disconnected { reason } => {
                    info!(device_id = %client_id, reason = ?reason, "Disconnected from broker");
                }
                ConnectionEvent::ReconnectFailed { error } => {
                    warn!(device_id = %client_id, error = %error, "Broker reconnect failed");
                }
                _ => {}
            })
            .await
    }
}

impl Transport for MqttTransport {
    fn connect<'a>(
        &'a self,
        endpoint: &'a BrokerEndpoint,
    ) -> impl Future<Output = TransportResult<ConnectAck>> + Send + 'a {
        async move {
            self.watch_connection().await?;

            let options = ConnectOptions::new(self.client_id.clone())
                .with_keep_alive(endpoint.keep_alive)
                .with_clean_start(true);
            let result = self
                .client
                .connect_with_options(&endpoint.url(), options)
                .await?;

            Ok(ConnectAck {
                session_present: result.session_present,
            })
        }
    }

    fn publish(
        &self,
        request: OutboundPublish,
    ) -> impl Future<Output = TransportResult<PublishAck>> + Send + '_ {
        async move {
            let mut options = PublishOptions::default();
            options.qos = request.qos;
            options.retain = false;
            options.properties.correlation_data = Some(request.correlation_id.into_bytes());

            let result = self
                .client
                .publish_with_options(request.topic, request.payload, options)
                .await?;

            Ok(PublishAck {
                packet_id: result.packet_id(),
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
            let mut options = SubscribeOptions::default();
            options.qos = qos;

            let (packet_id, granted_qos) = self
                .client
                .subscribe_with_options(topic, options, move |msg| {
                    on_message(InboundMessage {
                        topic: msg.topic,
                        payload: msg.payload,
                        correlation_id: msg.properties.correlation_data.map(CorrelationId::from),
                    });
                })
                .await?;

            Ok(SubscribeAck {
                packet_id,
                granted_qos,
            })
        }
    }

    fn unsubscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> impl Future<Output = TransportResult<()>> + Send + 'a {
        async move { self.client.unsubscribe(topic).await }
    }

    fn disconnect(&self) -> impl Future<Output = TransportResult<()>> + Send + '_ {
        async move { self.client.disconnect().await }
    }
}

/// Builds one `mqtt5` client per device, using the device id as client id
#[derive(Debug, Clone, Default)]
pub struct MqttTransportFactory;

impl TransportFactory for MqttTransportFactory {
    type Transport = MqttTransport;

    fn create(&self, client_id: &str) -> Self::Transport {
        MqttTransport::new(client_id)
    }
}
