// SPDX-License-Identifier: MIT

//! Store access for the two independently-owned databases.
//!
//! The workout store and the challenge store belong to different services
//! and share no transaction; this layer only reads the workout store and
//! writes derived state (progress rows, participant status) to the
//! challenge store. Every derived write is an idempotent upsert or a
//! monotonic one-way transition, never a blind increment. That, not
//! locking, is what makes redelivery and concurrent consumers safe.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryChallengeStore, MemoryWorkoutStore};
pub use postgres::{PgChallengeStore, PgWorkoutStore};

use std::future::Future;

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Challenge, ProgressEntry};

/// Read-only view of the workout store.
pub trait WorkoutStore: Send + Sync {
    /// Whether a workout row exists.
    fn workout_exists(&self, workout_id: i64) -> impl Future<Output = Result<bool>> + Send;
}

/// Challenge store operations used by the reconciler and verifier.
pub trait ChallengeStore: Send + Sync {
    /// Challenges where `user_id` is an active participant, the challenge is
    /// active, and `today` falls inside the challenge window.
    fn active_challenges_for_user(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> impl Future<Output = Result<Vec<Challenge>>> + Send;

    /// Insert or overwrite the progress row keyed by
    /// (challenge_id, user_id, workout_id).
    fn upsert_progress(&self, entry: &ProgressEntry) -> impl Future<Output = Result<()>> + Send;

    /// Sum of all progress rows for the participant.
    fn total_progress(
        &self,
        challenge_id: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<f64>> + Send;

    /// Flip the participant from `active` to `completed`.
    ///
    /// Returns true only for the call that performed the transition, so a
    /// completion event is emitted at most once however many consumers race
    /// on the same aggregate.
    fn complete_participant(
        &self,
        challenge_id: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Whether a challenge row exists.
    fn challenge_exists(&self, challenge_id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Whether a participant row exists for the pair.
    fn participant_exists(
        &self,
        challenge_id: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<bool>> + Send;
}
