// SPDX-License-Identifier: MIT

//! Workout row, owned by the workout store.
//!
//! The consistency layer never mutates workouts; it publishes an event when
//! one is written and checks existence afterwards.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Workout {
    pub id: i64,
    pub user_id: i64,
    /// Free-text activity name
    pub workout_type: String,
    /// Distance in km
    pub distance: Option<f64>,
    /// Duration in minutes
    pub duration: f64,
    pub calories: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
