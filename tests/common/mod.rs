// SPDX-License-Identifier: MIT

use chrono::{Duration as ChronoDuration, Utc};
use fitness_sync::events::{Envelope, WorkoutLogged, WORKOUT_LOGGED};
use fitness_sync::models::{Challenge, ChallengeStatus, ProgressEntry};
use std::future::Future;
use std::time::Duration;

/// An active challenge whose window spans today.
#[allow(dead_code)]
pub fn active_challenge(id: i64, challenge_type: &str, target: f64) -> Challenge {
    let today = Utc::now().date_naive();
    Challenge {
        id,
        name: format!("{challenge_type} challenge {id}"),
        challenge_type: challenge_type.to_string(),
        target_value: target,
        target_unit: "km".to_string(),
        start_date: today - ChronoDuration::days(7),
        end_date: today + ChronoDuration::days(7),
        status: ChallengeStatus::Active,
    }
}

#[allow(dead_code)]
pub fn workout(
    workout_id: i64,
    user_id: i64,
    workout_type: &str,
    distance: Option<f64>,
    duration: Option<f64>,
) -> WorkoutLogged {
    WorkoutLogged {
        workout_id,
        user_id,
        workout_type: workout_type.to_string(),
        distance,
        duration,
        calories: None,
        created_at: Some(Utc::now()),
    }
}

#[allow(dead_code)]
pub fn workout_envelope(workout: &WorkoutLogged) -> Envelope {
    Envelope::new(WORKOUT_LOGGED, workout).expect("serializable payload")
}

#[allow(dead_code)]
pub fn progress_entry(
    challenge_id: i64,
    user_id: i64,
    workout_id: i64,
    progress_value: f64,
) -> ProgressEntry {
    ProgressEntry {
        challenge_id,
        user_id,
        workout_id,
        progress_value,
        workout_type: "running".to_string(),
    }
}

/// Poll `check` until it returns true or two seconds have passed.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
