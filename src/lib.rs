// SPDX-License-Identifier: MIT

//! Fitness-Sync: event-driven data consistency for the fitness tracker.
//!
//! This crate implements the messaging layer that keeps the independently
//! owned workout and challenge datastores eventually consistent: a
//! fire-and-forget event publisher used by the workout write path, a
//! challenge progress reconciler, and a cross-store consistency verifier,
//! all coordinated through a durable topic-based message fabric with
//! at-least-once delivery.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod retry;
pub mod routes;
pub mod services;
