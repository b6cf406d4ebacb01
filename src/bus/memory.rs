// SPDX-License-Identifier: MIT

//! In-process message fabric for tests.
//!
//! Models the broker contract the consumers rely on: topic fan-out to every
//! bound queue, one in-flight delivery per subscription, redelivery of
//! unacked messages when a subscription is dropped, and reject-means-drop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::events::topic_matches;

use super::{BusError, BusSubscription, Delivery, MessageBus};

#[derive(Default)]
struct Queue {
    pattern: String,
    pending: VecDeque<Delivery>,
    inflight: Option<Delivery>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, Queue>,
}

/// In-memory topic exchange with durable queues.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently queued (pending, not in flight) on `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(queue).map_or(0, |q| q.pending.len())
    }
}

impl MessageBus for MemoryBus {
    type Subscription = MemorySubscription;

    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BusError> {
        {
            let mut inner = self.inner.lock().unwrap();
            for queue in inner.queues.values_mut() {
                if topic_matches(&queue.pattern, routing_key) {
                    queue.pending.push_back(Delivery {
                        routing_key: routing_key.to_string(),
                        body: body.to_vec(),
                    });
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn publish_to_queue(
        &self,
        queue: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BusError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.queues.entry(queue.to_string()).or_default();
            entry.pending.push_back(Delivery {
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str, pattern: &str) -> Result<MemorySubscription, BusError> {
        let mut inner = self.inner.lock().unwrap();
        // Re-subscribing to an existing durable queue keeps its backlog.
        let entry = inner.queues.entry(queue.to_string()).or_default();
        entry.pattern = pattern.to_string();
        Ok(MemorySubscription {
            bus: self.clone(),
            queue: queue.to_string(),
        })
    }
}

/// Consuming side of a [`MemoryBus`] queue.
pub struct MemorySubscription {
    bus: MemoryBus,
    queue: String,
}

impl MemorySubscription {
    fn take_next(&self) -> Option<Delivery> {
        let mut inner = self.bus.inner.lock().unwrap();
        let queue = inner.queues.get_mut(&self.queue)?;
        if queue.inflight.is_some() {
            return None;
        }
        let delivery = queue.pending.pop_front()?;
        queue.inflight = Some(delivery.clone());
        Some(delivery)
    }

    fn settle(&self) -> Option<Delivery> {
        let mut inner = self.bus.inner.lock().unwrap();
        inner
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.inflight.take())
    }
}

impl BusSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            let notified = self.bus.notify.notified();
            if let Some(delivery) = self.take_next() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&mut self) -> Result<(), BusError> {
        self.settle();
        Ok(())
    }

    async fn reject(&mut self) -> Result<(), BusError> {
        self.settle();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        // A consumer that dies mid-message gets it redelivered on restart.
        let mut inner = self.bus.inner.lock().unwrap();
        if let Some(queue) = inner.queues.get_mut(&self.queue) {
            if let Some(delivery) = queue.inflight.take() {
                queue.pending.push_front(delivery);
            }
        }
        self.bus.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::topics;

    #[tokio::test]
    async fn test_fan_out_to_all_bound_queues() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("queue-a", topics::WORKOUT_LOGGED).await.unwrap();
        let mut b = bus.subscribe("queue-b", topics::WORKOUT_LOGGED).await.unwrap();

        bus.publish(topics::WORKOUT_LOGGED, b"hello").await.unwrap();

        let da = a.next().await.unwrap();
        let db = b.next().await.unwrap();
        assert_eq!(da.body, b"hello");
        assert_eq!(db.body, b"hello");
        a.ack().await.unwrap();
        b.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_wildcard_binding_receives_all_challenge_events() {
        let bus = MemoryBus::new();
        let mut sub = bus
            .subscribe("challenges", topics::CHALLENGE_ALL)
            .await
            .unwrap();

        bus.publish(topics::CHALLENGE_PROGRESS, b"p").await.unwrap();
        bus.publish(topics::CHALLENGE_COMPLETED, b"c").await.unwrap();
        bus.publish(topics::WORKOUT_LOGGED, b"w").await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.routing_key, topics::CHALLENGE_PROGRESS);
        sub.ack().await.unwrap();

        let second = sub.next().await.unwrap();
        assert_eq!(second.routing_key, topics::CHALLENGE_COMPLETED);
        sub.ack().await.unwrap();

        assert_eq!(bus.pending("challenges"), 0);
    }

    #[tokio::test]
    async fn test_publish_to_queue_skips_other_bindings() {
        let bus = MemoryBus::new();
        let mut target = bus.subscribe("target", topics::WORKOUT_LOGGED).await.unwrap();
        let _other = bus.subscribe("other", topics::WORKOUT_LOGGED).await.unwrap();

        bus.publish_to_queue("target", topics::WORKOUT_LOGGED, b"direct")
            .await
            .unwrap();

        let delivery = target.next().await.unwrap();
        assert_eq!(delivery.routing_key, topics::WORKOUT_LOGGED);
        assert_eq!(delivery.body, b"direct");
        target.ack().await.unwrap();

        assert_eq!(bus.pending("other"), 0);
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_requeued_on_drop() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("q", topics::WORKOUT_LOGGED).await.unwrap();
        bus.publish(topics::WORKOUT_LOGGED, b"msg").await.unwrap();

        let _ = sub.next().await.unwrap();
        drop(sub); // consumer crash between consume and ack

        let mut again = bus.subscribe("q", topics::WORKOUT_LOGGED).await.unwrap();
        let redelivered = again.next().await.unwrap();
        assert_eq!(redelivered.body, b"msg");
        again.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_not_requeued() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("q", topics::WORKOUT_LOGGED).await.unwrap();
        bus.publish(topics::WORKOUT_LOGGED, b"poison").await.unwrap();

        let _ = sub.next().await.unwrap();
        sub.reject().await.unwrap();

        assert_eq!(bus.pending("q"), 0);
    }
}
