// SPDX-License-Identifier: MIT

//! Generic consumer loop: receive, parse, dispatch, settle.
//!
//! Failure policy. Parse failures and unprocessable payloads are poison:
//! logged and dropped without requeue. Transient failures (a store or the
//! broker being unavailable) are handed back to the consumer's own queue
//! with the envelope's `retries` counter bumped; past the redelivery cap the
//! event is dropped as dead-lettered. Handler failures never propagate out of the
//! loop; the consumer keeps going with the next message.

use crate::bus::{BusSubscription, Delivery, MessageBus};
use crate::error::AppError;
use crate::events::Envelope;
use crate::services::EventPublisher;

/// How a message handler failed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message can never be processed (malformed payload, missing
    /// required fields). Retrying cannot help.
    #[error("poison message: {0}")]
    Poison(String),

    /// A dependency was unavailable; the same message may succeed later.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        // Store and downstream errors are retryable by default.
        HandlerError::Transient(err.into())
    }
}

/// A per-queue message handler.
pub trait EventHandler: Send + Sync {
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> impl std::future::Future<Output = Result<(), HandlerError>> + Send;
}

impl<T: EventHandler> EventHandler for std::sync::Arc<T> {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        (**self).handle(envelope).await
    }
}

/// Run the consumer loop for one subscription until the bus closes.
///
/// One delivery is in flight at a time; the next message is not taken until
/// the current one has been settled.
pub async fn run_consumer<B, H>(
    bus: B,
    mut subscription: B::Subscription,
    handler: H,
    queue: &str,
    max_redeliveries: u32,
) where
    B: MessageBus,
    H: EventHandler,
{
    let requeuer = EventPublisher::new(bus);
    tracing::info!(queue, "Consumer started");

    loop {
        let delivery = match subscription.next().await {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!(queue, error = %err, "Subscription closed, stopping consumer");
                return;
            }
        };

        process_delivery(
            &requeuer,
            &mut subscription,
            &handler,
            queue,
            max_redeliveries,
            delivery,
        )
        .await;
    }
}

async fn process_delivery<B, S, H>(
    requeuer: &EventPublisher<B>,
    subscription: &mut S,
    handler: &H,
    queue: &str,
    max_redeliveries: u32,
    delivery: Delivery,
) where
    B: MessageBus,
    S: BusSubscription,
    H: EventHandler,
{
    let envelope = match Envelope::decode(&delivery.body) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(
                queue,
                routing_key = %delivery.routing_key,
                error = %err,
                "Unparseable message, dropping without requeue"
            );
            settle_reject(subscription, queue).await;
            return;
        }
    };

    match handler.handle(&envelope).await {
        Ok(()) => {
            if let Err(err) = subscription.ack().await {
                tracing::error!(queue, error = %err, "Failed to ack processed message");
            }
        }
        Err(HandlerError::Poison(reason)) => {
            tracing::warn!(
                queue,
                event_type = %envelope.event_type,
                reason,
                "Poison message, dropping without requeue"
            );
            settle_reject(subscription, queue).await;
        }
        Err(HandlerError::Transient(err)) => {
            if envelope.retries < max_redeliveries {
                // Back onto this queue only; the other bound queues already
                // got their own copies of the original.
                let requeued = requeuer
                    .requeue(queue, &delivery.routing_key, &envelope.with_retry())
                    .await;
                if requeued {
                    tracing::warn!(
                        queue,
                        event_type = %envelope.event_type,
                        retries = envelope.retries + 1,
                        error = %err,
                        "Transient failure, event requeued"
                    );
                } else {
                    // Requeue itself failed; the event is lost like any
                    // other broker-outage publish.
                    tracing::error!(
                        queue,
                        event_type = %envelope.event_type,
                        error = %err,
                        "Transient failure and requeue failed, dropping event"
                    );
                }
                settle_ack_original(subscription, queue).await;
            } else {
                tracing::error!(
                    queue,
                    event_type = %envelope.event_type,
                    retries = envelope.retries,
                    error = %err,
                    "Redelivery cap reached, dead-lettering event"
                );
                settle_reject(subscription, queue).await;
            }
        }
    }
}

async fn settle_reject<S: BusSubscription>(subscription: &mut S, queue: &str) {
    if let Err(err) = subscription.reject().await {
        tracing::error!(queue, error = %err, "Failed to reject message");
    }
}

async fn settle_ack_original<S: BusSubscription>(subscription: &mut S, queue: &str) {
    // The requeued copy now carries the event; the original is settled.
    if let Err(err) = subscription.ack().await {
        tracing::error!(queue, error = %err, "Failed to ack requeued message's original");
    }
}
