// SPDX-License-Identifier: MIT

//! Event publisher used after successful datastore writes.
//!
//! Contract: best-effort, non-blocking, failure is observability-only. The
//! workout write path calls this after its row has committed; the write and
//! the publish are not atomic, and a broker outage must never fail the
//! write. Every method therefore swallows errors after logging them and
//! leaves reconnecting to the bus's next-call lazy reconnect.

use crate::bus::MessageBus;
use crate::events::{
    self, ChallengeCompletedEvent, ChallengeProgressEvent, CompletionDetail, Envelope,
    ProgressDetail, WorkoutLogged, topics,
};
use crate::models::Workout;

/// Publishes fitness events to the `fitness_events` exchange.
#[derive(Clone)]
pub struct EventPublisher<B: MessageBus> {
    bus: B,
}

impl<B: MessageBus> EventPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Announce a committed workout row on `workout.logged`.
    pub async fn publish_workout_logged(&self, workout: &Workout) {
        let payload = WorkoutLogged {
            workout_id: workout.id,
            user_id: workout.user_id,
            workout_type: workout.workout_type.clone(),
            distance: workout.distance,
            duration: Some(workout.duration),
            calories: workout.calories,
            created_at: Some(workout.created_at),
        };
        self.emit(topics::WORKOUT_LOGGED, events::WORKOUT_LOGGED, &payload)
            .await;
    }

    /// Announce a persisted progress contribution on `challenge.progress`.
    pub async fn publish_challenge_progress(
        &self,
        challenge_id: i64,
        user_id: i64,
        progress: ProgressDetail,
    ) {
        let payload = ChallengeProgressEvent {
            challenge_id,
            user_id,
            progress,
        };
        self.emit(
            topics::CHALLENGE_PROGRESS,
            events::CHALLENGE_PROGRESS,
            &payload,
        )
        .await;
    }

    /// Announce a participant completion on `challenge.completed`.
    pub async fn publish_challenge_completed(
        &self,
        challenge_id: i64,
        user_id: i64,
        completion: CompletionDetail,
    ) {
        let payload = ChallengeCompletedEvent {
            challenge_id,
            user_id,
            completion,
        };
        self.emit(
            topics::CHALLENGE_COMPLETED,
            events::CHALLENGE_COMPLETED,
            &payload,
        )
        .await;
    }

    /// Hand a failed delivery back to the queue it came from. Direct to that
    /// one queue: the other consumers already settled their copies.
    pub async fn requeue(&self, queue: &str, routing_key: &str, envelope: &Envelope) -> bool {
        let body = match envelope.encode() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(queue, error = %err, "Failed to encode envelope for requeue");
                return false;
            }
        };
        match self.bus.publish_to_queue(queue, routing_key, &body).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(queue, error = %err, "Failed to requeue event");
                false
            }
        }
    }

    async fn emit<T: serde::Serialize>(&self, routing_key: &str, event_type: &str, payload: &T) {
        let envelope = match Envelope::new(event_type, payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(event_type, error = %err, "Failed to serialize event payload");
                return;
            }
        };

        let body = match envelope.encode() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(event_type, error = %err, "Failed to encode event");
                return;
            }
        };

        match self.bus.publish(routing_key, &body).await {
            Ok(()) => {
                tracing::info!(event_type, routing_key, "Published event");
            }
            Err(err) => {
                // Swallowed: the datastore write already committed and the
                // caller must not fail. The bus retries a fresh connect on
                // the next publish.
                tracing::error!(event_type, routing_key, error = %err, "Failed to publish event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusSubscription, MemoryBus};
    use chrono::Utc;

    fn workout() -> Workout {
        Workout {
            id: 11,
            user_id: 3,
            workout_type: "running".to_string(),
            distance: Some(5.2),
            duration: 31.0,
            calories: Some(280.0),
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_workout_logged_reaches_bound_queue() {
        let bus = MemoryBus::new();
        let mut sub = bus
            .subscribe("workouts", topics::WORKOUT_LOGGED)
            .await
            .unwrap();

        EventPublisher::new(bus).publish_workout_logged(&workout()).await;

        let delivery = sub.next().await.unwrap();
        let envelope = Envelope::decode(&delivery.body).unwrap();
        assert_eq!(envelope.event_type, events::WORKOUT_LOGGED);
        let payload: WorkoutLogged = envelope.payload().unwrap();
        assert_eq!(payload.workout_id, 11);
        assert_eq!(payload.user_id, 3);
        assert_eq!(payload.duration, Some(31.0));
        sub.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_with_dead_broker_does_not_fail_caller() {
        // An MqttBus pointed at nothing: connect fails, publish swallows.
        let bus = crate::bus::MqttBus::new("mqtt://127.0.0.1:1", "test-publisher")
            .unwrap()
            .with_connect_timeout(std::time::Duration::from_millis(200));

        // Must return (), not panic and not error.
        EventPublisher::new(bus).publish_workout_logged(&workout()).await;
    }
}
