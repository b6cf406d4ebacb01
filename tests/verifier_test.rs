// SPDX-License-Identifier: MIT

//! Cross-store consistency verifier behavior with in-memory stores. The
//! leaderboard client points at a closed port; its failures must stay
//! invisible to the handler result.

mod common;

use common::{active_challenge, progress_entry, workout, workout_envelope};
use fitness_sync::consumer::EventHandler;
use fitness_sync::db::{MemoryChallengeStore, MemoryWorkoutStore};
use fitness_sync::events::{Envelope, CHALLENGE_PROGRESS};
use fitness_sync::models::ParticipantStatus;
use fitness_sync::services::{ConsistencyVerifier, LeaderboardClient};

fn setup() -> (
    MemoryWorkoutStore,
    MemoryChallengeStore,
    ConsistencyVerifier<MemoryWorkoutStore, MemoryChallengeStore>,
) {
    let workouts = MemoryWorkoutStore::new();
    let challenges = MemoryChallengeStore::new();
    let verifier = ConsistencyVerifier::new(
        workouts.clone(),
        challenges.clone(),
        LeaderboardClient::new("http://127.0.0.1:1"),
    );
    (workouts, challenges, verifier)
}

#[tokio::test]
async fn test_repairs_missed_completion() {
    let (workouts, challenges, verifier) = setup();
    workouts.insert_workout(100);
    challenges.insert_challenge(active_challenge(1, "running", 50.0));
    challenges.insert_participant(1, 7, ParticipantStatus::Active);

    // The reconciler persisted enough progress but crashed before the
    // completion check.
    challenges.insert_progress(progress_entry(1, 7, 1, 30.0));
    challenges.insert_progress(progress_entry(1, 7, 100, 25.0));

    let envelope = workout_envelope(&workout(100, 7, "running", Some(25.0), Some(90.0)));
    verifier.handle(&envelope).await.unwrap();

    assert_eq!(
        challenges.participant_status(1, 7),
        Some(ParticipantStatus::Completed)
    );
}

#[tokio::test]
async fn test_below_target_stays_active() {
    let (workouts, challenges, verifier) = setup();
    workouts.insert_workout(100);
    challenges.insert_challenge(active_challenge(1, "running", 50.0));
    challenges.insert_participant(1, 7, ParticipantStatus::Active);
    challenges.insert_progress(progress_entry(1, 7, 100, 10.0));

    let envelope = workout_envelope(&workout(100, 7, "running", Some(10.0), Some(50.0)));
    verifier.handle(&envelope).await.unwrap();

    assert_eq!(
        challenges.participant_status(1, 7),
        Some(ParticipantStatus::Active)
    );
}

#[tokio::test]
async fn test_missing_workout_is_logged_not_repaired() {
    let (_workouts, challenges, verifier) = setup();
    challenges.insert_challenge(active_challenge(1, "running", 50.0));
    challenges.insert_participant(1, 7, ParticipantStatus::Active);
    challenges.insert_progress(progress_entry(1, 7, 1, 60.0));

    // Workout 100 was never written to the workout store: the event is a
    // phantom and triggers no recompute or repair.
    let envelope = workout_envelope(&workout(100, 7, "running", Some(5.0), Some(30.0)));
    verifier.handle(&envelope).await.unwrap();

    assert_eq!(
        challenges.participant_status(1, 7),
        Some(ParticipantStatus::Active)
    );
}

#[tokio::test]
async fn test_completed_participant_stays_completed() {
    let (workouts, challenges, verifier) = setup();
    workouts.insert_workout(100);
    challenges.insert_challenge(active_challenge(1, "running", 50.0));
    challenges.insert_participant(1, 7, ParticipantStatus::Completed);
    challenges.insert_progress(progress_entry(1, 7, 1, 60.0));

    let envelope = workout_envelope(&workout(100, 7, "running", Some(5.0), Some(30.0)));
    verifier.handle(&envelope).await.unwrap();

    // The transition is one-way regardless of how events replay.
    assert_eq!(
        challenges.participant_status(1, 7),
        Some(ParticipantStatus::Completed)
    );
}

#[tokio::test]
async fn test_challenge_progress_event_with_missing_rows_is_log_only() {
    let (_workouts, _challenges, verifier) = setup();

    // Neither the challenge nor the participant exists; still Ok so the
    // message gets acked rather than redelivered forever.
    let envelope = Envelope::new(
        CHALLENGE_PROGRESS,
        &serde_json::json!({
            "challengeId": 1,
            "userId": 7,
            "progress": {
                "challengeName": "ghost",
                "progressValue": 5.0,
                "targetValue": 50.0,
                "targetUnit": "km",
                "workoutType": "running",
                "workoutId": 100
            }
        }),
    )
    .unwrap();

    verifier.handle(&envelope).await.unwrap();
}

#[tokio::test]
async fn test_unhandled_challenge_event_types_are_acked() {
    let (_workouts, _challenges, verifier) = setup();

    let envelope = Envelope::new("ChallengeCompleted", &serde_json::json!({"any": "shape"}))
        .unwrap();
    verifier.handle(&envelope).await.unwrap();
}

#[tokio::test]
async fn test_malformed_workout_payload_is_poison() {
    let (_workouts, _challenges, verifier) = setup();

    let envelope = Envelope::new("WorkoutLogged", &serde_json::json!({"workoutId": 1})).unwrap();
    let err = verifier.handle(&envelope).await.unwrap_err();
    assert!(matches!(
        err,
        fitness_sync::consumer::HandlerError::Poison(_)
    ));
}
