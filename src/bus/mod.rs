// SPDX-License-Identifier: MIT

//! Message fabric abstraction.
//!
//! The broker is an external collaborator: a durable topic exchange named
//! `fitness_events` with per-consumer durable queues, persistent delivery,
//! and manual ack/reject. Production uses the MQTT implementation in
//! [`mqtt`]; tests use the in-process fabric in [`memory`], which has the
//! same fan-out, at-least-once, and reject-means-drop semantics.

pub mod memory;
pub mod mqtt;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;

use std::future::Future;

/// Exchange every event is published to.
pub const EXCHANGE_NAME: &str = "fitness_events";

/// Broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Broker connect failed: {0}")]
    Connect(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Ack(String),

    #[error("Connection closed")]
    Closed,
}

/// A single message taken off a queue.
///
/// The delivery stays in flight until the subscription it came from acks or
/// rejects it; a consumer crash before ack means redelivery (at-least-once).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Handle to the message fabric.
///
/// Implementations are cheap to clone and share one underlying connection.
pub trait MessageBus: Clone + Send + Sync + 'static {
    type Subscription: BusSubscription;

    /// Publish a persistent message to the exchange under `routing_key`.
    fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Deliver a message to one named queue, bypassing topic routing.
    ///
    /// Used to hand a failed delivery back to the queue it came from. Going
    /// through the exchange instead would fan a second copy out to every
    /// other bound queue, making the other consumers reprocess an event they
    /// already settled.
    fn publish_to_queue(
        &self,
        queue: &str,
        routing_key: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Declare the durable queue `queue`, bind it to the exchange with
    /// `pattern`, and start consuming from it.
    fn subscribe(
        &self,
        queue: &str,
        pattern: &str,
    ) -> impl Future<Output = Result<Self::Subscription, BusError>> + Send;
}

/// A consuming subscription with one delivery in flight at a time.
///
/// The prefetch window is a single message: `next` must not be called again
/// until the previous delivery was acked or rejected.
pub trait BusSubscription: Send {
    /// Wait for the next delivery.
    fn next(&mut self) -> impl Future<Output = Result<Delivery, BusError>> + Send;

    /// Acknowledge the in-flight delivery as processed.
    fn ack(&mut self) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Discard the in-flight delivery without requeueing it.
    fn reject(&mut self) -> impl Future<Output = Result<(), BusError>> + Send;
}
