// SPDX-License-Identifier: MIT

//! In-memory stores for tests, mirroring the Postgres semantics: the
//! progress map is keyed by (challenge_id, user_id, workout_id) so an upsert
//! overwrites, and the participant transition is conditional on the current
//! status.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Challenge, ChallengeStatus, ParticipantStatus, ProgressEntry};

use super::{ChallengeStore, WorkoutStore};

/// Mock workout store: a set of existing workout ids.
#[derive(Clone, Default)]
pub struct MemoryWorkoutStore {
    workouts: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryWorkoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workout(&self, workout_id: i64) {
        self.workouts.lock().unwrap().insert(workout_id);
    }
}

impl WorkoutStore for MemoryWorkoutStore {
    async fn workout_exists(&self, workout_id: i64) -> Result<bool> {
        Ok(self.workouts.lock().unwrap().contains(&workout_id))
    }
}

#[derive(Default)]
struct ChallengeData {
    challenges: HashMap<i64, Challenge>,
    participants: HashMap<(i64, i64), ParticipantStatus>,
    progress: HashMap<(i64, i64, i64), ProgressEntry>,
}

/// Mock challenge store.
#[derive(Clone, Default)]
pub struct MemoryChallengeStore {
    data: Arc<Mutex<ChallengeData>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_challenge(&self, challenge: Challenge) {
        self.data
            .lock()
            .unwrap()
            .challenges
            .insert(challenge.id, challenge);
    }

    pub fn insert_participant(&self, challenge_id: i64, user_id: i64, status: ParticipantStatus) {
        self.data
            .lock()
            .unwrap()
            .participants
            .insert((challenge_id, user_id), status);
    }

    /// Seed a progress row directly (bypassing the upsert path).
    pub fn insert_progress(&self, entry: ProgressEntry) {
        let key = (entry.challenge_id, entry.user_id, entry.workout_id);
        self.data.lock().unwrap().progress.insert(key, entry);
    }

    pub fn participant_status(&self, challenge_id: i64, user_id: i64) -> Option<ParticipantStatus> {
        self.data
            .lock()
            .unwrap()
            .participants
            .get(&(challenge_id, user_id))
            .copied()
    }

    pub fn progress_row(
        &self,
        challenge_id: i64,
        user_id: i64,
        workout_id: i64,
    ) -> Option<ProgressEntry> {
        self.data
            .lock()
            .unwrap()
            .progress
            .get(&(challenge_id, user_id, workout_id))
            .cloned()
    }

    pub fn progress_row_count(&self) -> usize {
        self.data.lock().unwrap().progress.len()
    }
}

impl ChallengeStore for MemoryChallengeStore {
    async fn active_challenges_for_user(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<Vec<Challenge>> {
        let data = self.data.lock().unwrap();
        let mut result: Vec<Challenge> = data
            .challenges
            .values()
            .filter(|c| {
                c.status == ChallengeStatus::Active
                    && c.start_date <= today
                    && c.end_date >= today
                    && data.participants.get(&(c.id, user_id))
                        == Some(&ParticipantStatus::Active)
            })
            .cloned()
            .collect();
        result.sort_by_key(|c| c.id);
        Ok(result)
    }

    async fn upsert_progress(&self, entry: &ProgressEntry) -> Result<()> {
        let key = (entry.challenge_id, entry.user_id, entry.workout_id);
        self.data.lock().unwrap().progress.insert(key, entry.clone());
        Ok(())
    }

    async fn total_progress(&self, challenge_id: i64, user_id: i64) -> Result<f64> {
        let data = self.data.lock().unwrap();
        Ok(data
            .progress
            .values()
            .filter(|p| p.challenge_id == challenge_id && p.user_id == user_id)
            .map(|p| p.progress_value)
            .sum())
    }

    async fn complete_participant(&self, challenge_id: i64, user_id: i64) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        match data.participants.get_mut(&(challenge_id, user_id)) {
            Some(status @ ParticipantStatus::Active) => {
                *status = ParticipantStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn challenge_exists(&self, challenge_id: i64) -> Result<bool> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .challenges
            .contains_key(&challenge_id))
    }

    async fn participant_exists(&self, challenge_id: i64, user_id: i64) -> Result<bool> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .participants
            .contains_key(&(challenge_id, user_id)))
    }
}
