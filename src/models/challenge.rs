// SPDX-License-Identifier: MIT

//! Challenge store rows: challenges, participants, and the progress ledger.

use chrono::NaiveDate;

/// Lifecycle of a challenge. Only `active` challenges accumulate progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Active,
    Completed,
    Cancelled,
}

impl ChallengeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ChallengeStatus::Active),
            "completed" => Some(ChallengeStatus::Completed),
            "cancelled" => Some(ChallengeStatus::Cancelled),
            _ => None,
        }
    }
}

/// Participant status. The transition to `completed` is one-way: once a
/// participant finishes a challenge, no later event processing reverts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Active,
    Completed,
}

impl ParticipantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantStatus::Active => "active",
            ParticipantStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ParticipantStatus::Active),
            "completed" => Some(ParticipantStatus::Completed),
            _ => None,
        }
    }
}

/// Challenge row. `challenge_type` is an open string in practice; the known
/// values are steps, running, cycling, duration, distance, workouts and
/// calories.
///
/// Invariant: `start_date < end_date`.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    pub challenge_type: String,
    pub target_value: f64,
    pub target_unit: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ChallengeStatus,
}

/// One progress contribution, keyed by (challenge, user, workout).
///
/// That key is the idempotency mechanism for the whole layer: redelivering
/// the same `workout.logged` event overwrites this row instead of adding a
/// second contribution. Progress rows are never deleted; total progress is
/// the sum over all rows for a (challenge, user) pair.
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub challenge_id: i64,
    pub user_id: i64,
    pub workout_id: i64,
    pub progress_value: f64,
    pub workout_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChallengeStatus::Active,
            ChallengeStatus::Completed,
            ChallengeStatus::Cancelled,
        ] {
            assert_eq!(ChallengeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChallengeStatus::parse("archived"), None);

        for status in [ParticipantStatus::Active, ParticipantStatus::Completed] {
            assert_eq!(ParticipantStatus::parse(status.as_str()), Some(status));
        }
    }
}
