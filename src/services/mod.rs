// SPDX-License-Identifier: MIT

//! Services module - the consistency layer's business logic.

pub mod leaderboard;
pub mod publisher;
pub mod reconciler;
pub mod verifier;

pub use leaderboard::LeaderboardClient;
pub use publisher::EventPublisher;
pub use reconciler::ChallengeReconciler;
pub use verifier::ConsistencyVerifier;
