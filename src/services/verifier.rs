// SPDX-License-Identifier: MIT

//! Cross-store consistency verifier.
//!
//! The reconciler's incremental path can miss updates (a crash between
//! persist and completion check, or consumers racing on the same event), so
//! this service independently re-derives state instead of trusting it: it
//! verifies that referenced rows exist in their owning datastore, recomputes
//! aggregate challenge progress from the ledger rows, and repairs missed
//! participant completions. Inconsistencies in the source stores themselves
//! are logged only; no compensation is performed.
//!
//! It also pushes a leaderboard score delta per workout, best-effort.

use chrono::Utc;

use crate::consumer::{EventHandler, HandlerError};
use crate::db::{ChallengeStore, WorkoutStore};
use crate::events::{self, ChallengeProgressEvent, Envelope, WorkoutLogged};
use crate::services::leaderboard::{score_delta, LeaderboardClient};

/// Consumer of `workout.logged` and `challenge.*` on the data-consistency
/// queues. One instance serves both queues; dispatch is by event type.
pub struct ConsistencyVerifier<W, C>
where
    W: WorkoutStore,
    C: ChallengeStore,
{
    workouts: W,
    challenges: C,
    leaderboard: LeaderboardClient,
}

impl<W, C> ConsistencyVerifier<W, C>
where
    W: WorkoutStore,
    C: ChallengeStore,
{
    pub fn new(workouts: W, challenges: C, leaderboard: LeaderboardClient) -> Self {
        Self {
            workouts,
            challenges,
            leaderboard,
        }
    }

    async fn verify_workout(&self, workout: &WorkoutLogged) -> Result<(), HandlerError> {
        if !self.workouts.workout_exists(workout.workout_id).await? {
            // Known gap: no compensation action, observability only.
            tracing::error!(
                workout_id = workout.workout_id,
                user_id = workout.user_id,
                "Data inconsistency: workout not found in workout store"
            );
            return Ok(());
        }

        self.recompute_progress(workout.user_id).await?;
        self.push_leaderboard(workout).await;

        tracing::debug!(
            workout_id = workout.workout_id,
            user_id = workout.user_id,
            "Workout consistency verified"
        );
        Ok(())
    }

    /// Recompute every active challenge total for the user from the ledger
    /// rows and repair missed completions. This is the authoritative
    /// completion check: idempotent and safe to run redundantly alongside
    /// the reconciler.
    async fn recompute_progress(&self, user_id: i64) -> Result<(), HandlerError> {
        let today = Utc::now().date_naive();
        let challenges = self
            .challenges
            .active_challenges_for_user(user_id, today)
            .await?;

        for challenge in challenges {
            let total = self
                .challenges
                .total_progress(challenge.id, user_id)
                .await?;

            tracing::debug!(
                challenge_id = challenge.id,
                challenge = %challenge.name,
                user_id,
                total,
                target = challenge.target_value,
                "Recomputed challenge progress"
            );

            if total >= challenge.target_value {
                let flipped = self
                    .challenges
                    .complete_participant(challenge.id, user_id)
                    .await?;
                if flipped {
                    tracing::warn!(
                        challenge_id = challenge.id,
                        challenge = %challenge.name,
                        user_id,
                        total,
                        "Repaired missed challenge completion"
                    );
                }
            }
        }

        Ok(())
    }

    /// Best-effort leaderboard push; failure never affects the ack outcome.
    async fn push_leaderboard(&self, workout: &WorkoutLogged) {
        let delta = score_delta(workout.duration, workout.calories);
        if delta <= 0.0 {
            tracing::debug!(
                workout_id = workout.workout_id,
                "No leaderboard points for workout"
            );
            return;
        }

        if let Err(err) = self
            .leaderboard
            .push_score_delta(workout.user_id, delta)
            .await
        {
            tracing::warn!(
                user_id = workout.user_id,
                delta,
                error = %err,
                "Leaderboard push failed (ignored)"
            );
        }
    }

    async fn verify_challenge(&self, event: &ChallengeProgressEvent) -> Result<(), HandlerError> {
        if !self.challenges.challenge_exists(event.challenge_id).await? {
            tracing::error!(
                challenge_id = event.challenge_id,
                "Data inconsistency: challenge not found in challenge store"
            );
            return Ok(());
        }

        if !self
            .challenges
            .participant_exists(event.challenge_id, event.user_id)
            .await?
        {
            tracing::error!(
                challenge_id = event.challenge_id,
                user_id = event.user_id,
                "Data inconsistency: participant not found"
            );
            return Ok(());
        }

        tracing::debug!(
            challenge_id = event.challenge_id,
            user_id = event.user_id,
            "Challenge consistency verified"
        );
        Ok(())
    }
}

impl<W, C> EventHandler for ConsistencyVerifier<W, C>
where
    W: WorkoutStore,
    C: ChallengeStore,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope.event_type.as_str() {
            events::WORKOUT_LOGGED => {
                let workout: WorkoutLogged = envelope.payload().map_err(|e| {
                    HandlerError::Poison(format!("invalid WorkoutLogged payload: {e}"))
                })?;
                self.verify_workout(&workout).await
            }
            events::CHALLENGE_PROGRESS => {
                let event: ChallengeProgressEvent = envelope.payload().map_err(|e| {
                    HandlerError::Poison(format!("invalid ChallengeProgress payload: {e}"))
                })?;
                self.verify_challenge(&event).await
            }
            other => {
                // Completion events (and anything new) are acked untouched.
                tracing::debug!(event_type = %other, "No consistency check for event type");
                Ok(())
            }
        }
    }
}
