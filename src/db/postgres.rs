// SPDX-License-Identifier: MIT

//! Postgres-backed stores.
//!
//! Two independent pools, one per owning service's database. Pools are
//! created lazily so a store outage at boot degrades to per-message
//! transient errors instead of preventing startup.

use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{AppError, Result};
use crate::models::{Challenge, ChallengeStatus, ProgressEntry};

use super::{ChallengeStore, WorkoutStore};

/// Read-only client for the workout service's database.
#[derive(Clone)]
pub struct PgWorkoutStore {
    pool: PgPool,
}

impl PgWorkoutStore {
    pub fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(Self { pool })
    }
}

impl WorkoutStore for PgWorkoutStore {
    async fn workout_exists(&self, workout_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM workouts WHERE id = $1)")
                .bind(workout_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

/// Client for the challenge service's database.
#[derive(Clone)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    pub fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(Self { pool })
    }
}

impl ChallengeStore for PgChallengeStore {
    async fn active_challenges_for_user(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<Vec<Challenge>> {
        let rows = sqlx::query(
            r"
            SELECT c.id, c.name, c.type, c.target_value, c.target_unit,
                   c.start_date, c.end_date, c.status
            FROM challenges c
            JOIN challenge_participants p ON c.id = p.challenge_id
            WHERE p.user_id = $1
              AND c.status = 'active' AND p.status = 'active'
              AND c.start_date <= $2 AND c.end_date >= $2
            ",
        )
        .bind(user_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status_raw: String = row.try_get("status")?;
                let status = ChallengeStatus::parse(&status_raw).ok_or_else(|| {
                    sqlx::Error::Decode(
                        format!("unknown challenge status {status_raw:?}").into(),
                    )
                })?;
                Ok(Challenge {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    challenge_type: row.try_get("type")?,
                    target_value: row.try_get("target_value")?,
                    target_unit: row.try_get("target_unit")?,
                    start_date: row.try_get("start_date")?,
                    end_date: row.try_get("end_date")?,
                    status,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(AppError::from)
    }

    async fn upsert_progress(&self, entry: &ProgressEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO challenge_progress
                (challenge_id, user_id, workout_id, progress_value, workout_type, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (challenge_id, user_id, workout_id)
            DO UPDATE SET progress_value = EXCLUDED.progress_value
            ",
        )
        .bind(entry.challenge_id)
        .bind(entry.user_id)
        .bind(entry.workout_id)
        .bind(entry.progress_value)
        .bind(&entry.workout_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn total_progress(&self, challenge_id: i64, user_id: i64) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(SUM(progress_value), 0)
            FROM challenge_progress
            WHERE challenge_id = $1 AND user_id = $2
            ",
        )
        .bind(challenge_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn complete_participant(&self, challenge_id: i64, user_id: i64) -> Result<bool> {
        // Conditional on status = 'active': the flip happens once, and a
        // concurrent consumer running the same check loses the race cleanly.
        let result = sqlx::query(
            r"
            UPDATE challenge_participants
            SET status = 'completed'
            WHERE challenge_id = $1 AND user_id = $2 AND status = 'active'
            ",
        )
        .bind(challenge_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn challenge_exists(&self, challenge_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM challenges WHERE id = $1)")
                .bind(challenge_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn participant_exists(&self, challenge_id: i64, user_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM challenge_participants
                WHERE challenge_id = $1 AND user_id = $2
            )
            ",
        )
        .bind(challenge_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
