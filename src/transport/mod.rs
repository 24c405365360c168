//! Transport port
//!
//! Devices never talk to a network library directly. They drive a
//! [`Transport`], which offers connect, publish, subscribe and disconnect, and
//! delivers inbound messages through the callback handed to `subscribe`.
//!
//! Two implementations ship with the crate:
//! - [`mqtt::MqttTransport`] over the `mqtt5` async client
//! - [`mock::MockTransport`], an in-memory double that records every call

pub mod mock;
pub mod mqtt;

use crate::types::{BrokerEndpoint, ConnectAck, InboundMessage, OutboundPublish, PublishAck, SubscribeAck};
use mqtt5::{MqttError, QoS};
use std::future::Future;

pub use mock::{MockCall, MockNetwork, MockTransport};
pub use mqtt::{MqttTransport, MqttTransportFactory};

pub type TransportResult<T> = std::result::Result<T, MqttError>;

/// Capability a device uses to reach the broker
///
/// One transport instance belongs to exactly one device.
pub trait Transport: Send + Sync + 'static {
    /// Opens the session with the broker
    fn connect<'a>(
        &'a self,
        endpoint: &'a BrokerEndpoint,
    ) -> impl Future<Output = TransportResult<ConnectAck>> + Send + 'a;

    /// Publishes one message carrying its correlation identifier
    fn publish(
        &self,
        request: OutboundPublish,
    ) -> impl Future<Output = TransportResult<PublishAck>> + Send + '_;

    /// Subscribes to a topic; `on_message` runs for every delivered message
    fn subscribe<'a, F>(
        &'a self,
        topic: &'a str,
        qos: QoS,
        on_message: F,
    ) -> impl Future<Output = TransportResult<SubscribeAck>> + Send + 'a
    where
        F: Fn(InboundMessage) + Send + Sync + 'static;

    fn unsubscribe<'a>(&'a self, topic: &'a str)
        -> impl Future<Output = TransportResult<()>> + Send + 'a;

    fn disconnect(&self) -> impl Future<Output = TransportResult<()>> + Send + '_;
}

/// Creates one transport per spawned device
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: Transport;

    fn create(&self, client_id: &str) -> Self::Transport;
}
