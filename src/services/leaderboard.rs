// SPDX-License-Identifier: MIT

//! Leaderboard service client.
//!
//! The push is best-effort by contract: the verifier logs failures and moves
//! on, and the outcome never influences whether a message is acked.

use serde::Serialize;
use std::time::Duration;

use crate::error::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Score contribution of a workout: one point per minute plus 0.1 points
/// per calorie.
pub fn score_delta(duration: Option<f64>, calories: Option<f64>) -> f64 {
    duration.unwrap_or(0.0) + 0.1 * calories.unwrap_or(0.0)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreUpdate {
    score_delta: f64,
}

/// HTTP client for the leaderboard service.
#[derive(Clone)]
pub struct LeaderboardClient {
    http: reqwest::Client,
    base_url: String,
}

impl LeaderboardClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// POST the score delta for a user.
    pub async fn push_score_delta(&self, user_id: i64, delta: f64) -> Result<()> {
        let url = format!("{}/leaderboard/update/{}", self.base_url, user_id);

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&ScoreUpdate { score_delta: delta })
            .send()
            .await
            .map_err(|e| AppError::Leaderboard(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Leaderboard(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        tracing::info!(user_id, delta, "Leaderboard updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_delta() {
        assert_eq!(score_delta(Some(30.0), Some(200.0)), 50.0);
        assert_eq!(score_delta(Some(45.0), None), 45.0);
        assert_eq!(score_delta(None, Some(100.0)), 10.0);
        assert_eq!(score_delta(None, None), 0.0);
    }
}
