// SPDX-License-Identifier: MIT

//! Challenge progress reconciler.
//!
//! Consumes `workout.logged` and turns each workout into progress
//! contributions for the challenges its user is actively participating in.
//! Per message: match challenges, compute a type-specific progress value,
//! upsert the (challenge, user, workout) progress row, then re-derive each
//! participant's total and flip them to completed when the target is met.
//!
//! Redelivery safety comes from the upsert key, not from any locking: the
//! same workout always contributes the same amount exactly once.

use chrono::Utc;

use crate::bus::MessageBus;
use crate::consumer::{EventHandler, HandlerError};
use crate::db::ChallengeStore;
use crate::events::{
    self, CompletionDetail, Envelope, ProgressDetail, WorkoutLogged,
};
use crate::models::Challenge;
use crate::services::EventPublisher;

/// True if a workout of `workout_type` counts toward a challenge of
/// `challenge_type`. Equal types always match; `steps` challenges also
/// accept `walking` workouts.
pub fn challenge_accepts(challenge_type: &str, workout_type: &str) -> bool {
    challenge_type == workout_type || (challenge_type == "steps" && workout_type == "walking")
}

/// Progress contributed by a workout, by challenge type:
/// - `steps`: distance (km) converted at ~2000 steps/km, rounded;
/// - `running`/`cycling`: the raw distance;
/// - `duration`: the raw duration in minutes;
/// - anything else: distance if present and positive, else duration, else 0.
pub fn progress_value(challenge_type: &str, workout: &WorkoutLogged) -> f64 {
    match challenge_type {
        "steps" => (workout.distance.unwrap_or(0.0) * 2000.0).round(),
        "running" | "cycling" => workout.distance.unwrap_or(0.0),
        "duration" => workout.duration.unwrap_or(0.0),
        _ => match workout.distance {
            Some(d) if d > 0.0 => d,
            _ => workout.duration.unwrap_or(0.0),
        },
    }
}

/// Consumer of `workout.logged` on the challenge service's queue.
pub struct ChallengeReconciler<S, B>
where
    S: ChallengeStore,
    B: MessageBus,
{
    store: S,
    publisher: EventPublisher<B>,
}

impl<S, B> ChallengeReconciler<S, B>
where
    S: ChallengeStore,
    B: MessageBus,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            publisher: EventPublisher::new(bus),
        }
    }

    async fn process(&self, workout: &WorkoutLogged) -> Result<(), HandlerError> {
        let today = Utc::now().date_naive();
        let challenges = self
            .store
            .active_challenges_for_user(workout.user_id, today)
            .await?;

        if challenges.is_empty() {
            tracing::info!(
                user_id = workout.user_id,
                workout_id = workout.workout_id,
                "User has no active challenge participations"
            );
            return Ok(());
        }

        tracing::info!(
            user_id = workout.user_id,
            workout_id = workout.workout_id,
            challenges = challenges.len(),
            "Updating challenge progress"
        );

        let updated = self.apply_progress(workout, &challenges).await?;
        if updated > 0 {
            self.check_completion(workout.user_id, &challenges).await?;
        }

        Ok(())
    }

    /// Steps 3-6: relevance, progress computation, idempotent upsert, and
    /// the best-effort progress event. Returns how many challenges were
    /// updated.
    async fn apply_progress(
        &self,
        workout: &WorkoutLogged,
        challenges: &[Challenge],
    ) -> Result<usize, HandlerError> {
        let mut updated = 0;

        for challenge in challenges {
            if !challenge_accepts(&challenge.challenge_type, &workout.workout_type) {
                tracing::debug!(
                    challenge_id = challenge.id,
                    challenge_type = %challenge.challenge_type,
                    workout_type = %workout.workout_type,
                    "Workout type does not match challenge type"
                );
                continue;
            }

            let value = progress_value(&challenge.challenge_type, workout);
            if value <= 0.0 {
                continue;
            }

            let entry = crate::models::ProgressEntry {
                challenge_id: challenge.id,
                user_id: workout.user_id,
                workout_id: workout.workout_id,
                progress_value: value,
                workout_type: workout.workout_type.clone(),
            };
            self.store.upsert_progress(&entry).await?;
            updated += 1;

            tracing::info!(
                challenge_id = challenge.id,
                challenge = %challenge.name,
                user_id = workout.user_id,
                workout_id = workout.workout_id,
                progress = value,
                unit = %challenge.target_unit,
                "Recorded challenge progress"
            );

            self.publisher
                .publish_challenge_progress(
                    challenge.id,
                    workout.user_id,
                    ProgressDetail {
                        challenge_name: challenge.name.clone(),
                        progress_value: value,
                        target_value: challenge.target_value,
                        target_unit: challenge.target_unit.clone(),
                        workout_type: workout.workout_type.clone(),
                        workout_id: workout.workout_id,
                    },
                )
                .await;
        }

        Ok(updated)
    }

    /// Step 7: re-derive totals and flip newly-completed participants.
    async fn check_completion(
        &self,
        user_id: i64,
        challenges: &[Challenge],
    ) -> Result<(), HandlerError> {
        for challenge in challenges {
            let total = self.store.total_progress(challenge.id, user_id).await?;

            tracing::debug!(
                challenge_id = challenge.id,
                user_id,
                total,
                target = challenge.target_value,
                "Challenge progress total"
            );

            if total < challenge.target_value {
                continue;
            }

            // The conditional transition reports true exactly once, so the
            // completion event cannot be emitted twice for one participant.
            if self.store.complete_participant(challenge.id, user_id).await? {
                tracing::info!(
                    challenge_id = challenge.id,
                    challenge = %challenge.name,
                    user_id,
                    total,
                    "Challenge completed"
                );

                self.publisher
                    .publish_challenge_completed(
                        challenge.id,
                        user_id,
                        CompletionDetail {
                            challenge_name: challenge.name.clone(),
                            target_value: challenge.target_value,
                            target_unit: challenge.target_unit.clone(),
                            total_progress: total,
                            completion_date: Utc::now(),
                        },
                    )
                    .await;
            }
        }

        Ok(())
    }
}

impl<S, B> EventHandler for ChallengeReconciler<S, B>
where
    S: ChallengeStore,
    B: MessageBus,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if envelope.event_type != events::WORKOUT_LOGGED {
            tracing::debug!(event_type = %envelope.event_type, "Ignoring unexpected event type");
            return Ok(());
        }

        let workout: WorkoutLogged = envelope
            .payload()
            .map_err(|e| HandlerError::Poison(format!("invalid WorkoutLogged payload: {e}")))?;

        self.process(&workout).await
    }
}
