// SPDX-License-Identifier: MIT

//! Data models for the rows the consistency layer reads and derives.

pub mod challenge;
pub mod workout;

pub use challenge::{Challenge, ChallengeStatus, ParticipantStatus, ProgressEntry};
pub use workout::Workout;
