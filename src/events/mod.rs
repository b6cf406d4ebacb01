// SPDX-License-Identifier: MIT

//! Event envelope and payload shapes for the fitness event fabric.
//!
//! Everything on the wire is JSON with camelCase field names, wrapped in a
//! `{type, timestamp, data}` envelope. Consumers must tolerate redelivery:
//! the broker guarantees at-least-once, not exactly-once.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Event type discriminators carried in the envelope.
pub const WORKOUT_LOGGED: &str = "WorkoutLogged";
pub const CHALLENGE_PROGRESS: &str = "ChallengeProgress";
pub const CHALLENGE_COMPLETED: &str = "ChallengeCompleted";

/// Routing keys and binding patterns on the `fitness_events` exchange.
pub mod topics {
    pub const WORKOUT_LOGGED: &str = "workout.logged";
    pub const CHALLENGE_PROGRESS: &str = "challenge.progress";
    pub const CHALLENGE_COMPLETED: &str = "challenge.completed";
    /// Wildcard binding matching every challenge event.
    pub const CHALLENGE_ALL: &str = "challenge.*";
}

/// Returns true if a dot-separated binding pattern matches a routing key.
///
/// `*` matches exactly one segment; there is no multi-segment wildcard.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut key = routing_key.split('.');
    loop {
        match (pat.next(), key.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(k)) if p == k => {}
            _ => return false,
        }
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Wire envelope wrapping every published event.
///
/// `retries` counts how many times a consumer has requeued this event after
/// a transient failure. It is absent from the wire until the first requeue,
/// so the shape stays compatible with payloads from the other services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
}

impl Envelope {
    /// Wrap a payload in a fresh envelope stamped with the current time.
    pub fn new<T: Serialize>(event_type: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data: serde_json::to_value(data)?,
            retries: 0,
        })
    }

    /// Serialize for publishing.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a raw message body.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Deserialize the typed payload out of `data`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Copy of this envelope with the requeue counter bumped.
    pub fn with_retry(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }
}

/// `workout.logged` payload, published after a workout row commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutLogged {
    pub workout_id: i64,
    pub user_id: i64,
    /// Free-text activity name ("running", "walking", ...)
    #[serde(rename = "type")]
    pub workout_type: String,
    /// Distance in km
    #[serde(default)]
    pub distance: Option<f64>,
    /// Duration in minutes
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `challenge.progress` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeProgressEvent {
    pub challenge_id: i64,
    pub user_id: i64,
    pub progress: ProgressDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    pub challenge_name: String,
    pub progress_value: f64,
    pub target_value: f64,
    pub target_unit: String,
    pub workout_type: String,
    pub workout_id: i64,
}

/// `challenge.completed` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCompletedEvent {
    pub challenge_id: i64,
    pub user_id: i64,
    pub completion: CompletionDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetail {
    pub challenge_name: String,
    pub target_value: f64,
    pub target_unit: String,
    pub total_progress: f64,
    pub completion_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("workout.logged", "workout.logged"));
        assert!(!topic_matches("workout.logged", "workout.deleted"));
        assert!(!topic_matches("workout.logged", "challenge.progress"));
    }

    #[test]
    fn test_topic_matches_wildcard() {
        assert!(topic_matches("challenge.*", "challenge.progress"));
        assert!(topic_matches("challenge.*", "challenge.completed"));
        assert!(!topic_matches("challenge.*", "workout.logged"));
        // Single-segment wildcard does not span dots
        assert!(!topic_matches("challenge.*", "challenge.progress.extra"));
        assert!(!topic_matches("challenge.*", "challenge"));
    }

    #[test]
    fn test_envelope_round_trip() {
        let payload = WorkoutLogged {
            workout_id: 42,
            user_id: 7,
            workout_type: "running".to_string(),
            distance: Some(5.0),
            duration: Some(30.0),
            calories: None,
            created_at: None,
        };

        let envelope = Envelope::new(WORKOUT_LOGGED, &payload).unwrap();
        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.event_type, WORKOUT_LOGGED);
        assert_eq!(decoded.retries, 0);
        let back: WorkoutLogged = decoded.payload().unwrap();
        assert_eq!(back.workout_id, 42);
        assert_eq!(back.user_id, 7);
        assert_eq!(back.distance, Some(5.0));
    }

    #[test]
    fn test_envelope_wire_shape_is_camel_case() {
        let payload = WorkoutLogged {
            workout_id: 1,
            user_id: 2,
            workout_type: "cycling".to_string(),
            distance: Some(12.5),
            duration: Some(45.0),
            calories: Some(300.0),
            created_at: None,
        };
        let envelope = Envelope::new(WORKOUT_LOGGED, &payload).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&envelope.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "WorkoutLogged");
        assert_eq!(json["data"]["workoutId"], 1);
        assert_eq!(json["data"]["userId"], 2);
        assert_eq!(json["data"]["type"], "cycling");
        // retries is not serialized until the first requeue
        assert!(json.get("retries").is_none());
    }

    #[test]
    fn test_envelope_missing_required_field_fails() {
        // No userId: the payload cannot be deserialized.
        let body = br#"{"type":"WorkoutLogged","timestamp":"2025-01-01T00:00:00Z","data":{"workoutId":1,"type":"running"}}"#;
        let envelope = Envelope::decode(body).unwrap();
        assert!(envelope.payload::<WorkoutLogged>().is_err());
    }

    #[test]
    fn test_with_retry_bumps_counter_and_serializes() {
        let envelope = Envelope {
            event_type: WORKOUT_LOGGED.to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
            retries: 0,
        };

        let requeued = envelope.with_retry().with_retry();
        assert_eq!(requeued.retries, 2);

        let json: serde_json::Value =
            serde_json::from_slice(&requeued.encode().unwrap()).unwrap();
        assert_eq!(json["retries"], 2);
    }
}
