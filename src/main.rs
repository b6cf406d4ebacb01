// SPDX-License-Identifier: MIT

//! Fitness-Sync service binary.
//!
//! Runs the configured consumer loops (challenge progress reconciler and
//! cross-store consistency verifier) against the shared event broker, plus
//! a small HTTP surface for health checks.

use std::sync::Arc;

use fitness_sync::{
    bus::{MessageBus, MqttBus},
    config::{
        Config, ConsumerRole, RECONCILER_QUEUE, VERIFIER_CHALLENGE_QUEUE, VERIFIER_WORKOUT_QUEUE,
    },
    consumer::run_consumer,
    db::{PgChallengeStore, PgWorkoutStore},
    events::topics,
    retry::RetryPolicy,
    services::{ChallengeReconciler, ConsistencyVerifier, LeaderboardClient},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        roles = ?config.roles,
        "Starting Fitness-Sync"
    );

    // Lazy pools: a store outage at boot shows up as per-message transient
    // errors rather than preventing startup.
    let workout_store = PgWorkoutStore::connect(&config.workout_database_url)
        .expect("Failed to create workout store pool");
    let challenge_store = PgChallengeStore::connect(&config.challenge_database_url)
        .expect("Failed to create challenge store pool");

    let startup_retry = RetryPolicy::fixed(config.connect_max_attempts, config.connect_retry_delay);

    if config.roles.contains(&ConsumerRole::Reconciler) {
        start_reconciler(&config, &startup_retry, challenge_store.clone()).await;
    }

    if config.roles.contains(&ConsumerRole::Verifier) {
        start_verifier(
            &config,
            &startup_retry,
            workout_store.clone(),
            challenge_store.clone(),
        )
        .await;
    }

    // Build router
    let app = fitness_sync::routes::create_router();

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    Ok(())
}

/// Start the challenge progress reconciler on its durable queue. If the
/// broker stays unreachable past the startup retry budget the consumer is
/// skipped; the rest of the process still comes up.
async fn start_reconciler(config: &Config, retry: &RetryPolicy, store: PgChallengeStore) {
    let bus = match MqttBus::new(&config.broker_url, "challenge-service") {
        Ok(bus) => bus,
        Err(err) => {
            tracing::error!(error = %err, "Invalid broker URL, reconciler not started");
            return;
        }
    };

    // Front-load the publishing connect under the startup budget; if the
    // broker stays down the publisher degrades to lazy reconnect per publish.
    if retry.run("publisher connect", || bus.connect()).await.is_err() {
        tracing::warn!("Broker unreachable at startup, publishing will reconnect lazily");
    }

    let subscription = retry
        .run("reconciler subscribe", || {
            bus.subscribe(RECONCILER_QUEUE, topics::WORKOUT_LOGGED)
        })
        .await;

    match subscription {
        Ok(subscription) => {
            let handler = ChallengeReconciler::new(store, bus.clone());
            let max_redeliveries = config.max_redeliveries;
            tokio::spawn(async move {
                run_consumer(bus, subscription, handler, RECONCILER_QUEUE, max_redeliveries).await;
            });
        }
        Err(err) => {
            tracing::error!(error = %err, "Broker unreachable, reconciler not started");
        }
    }
}

/// Start the consistency verifier: one handler, two durable queues (workout
/// events and the challenge event wildcard).
async fn start_verifier(
    config: &Config,
    retry: &RetryPolicy,
    workouts: PgWorkoutStore,
    challenges: PgChallengeStore,
) {
    let bus = match MqttBus::new(&config.broker_url, "data-consistency-service") {
        Ok(bus) => bus,
        Err(err) => {
            tracing::error!(error = %err, "Invalid broker URL, verifier not started");
            return;
        }
    };

    let leaderboard = LeaderboardClient::new(&config.leaderboard_url);
    let verifier = Arc::new(ConsistencyVerifier::new(workouts, challenges, leaderboard));

    let bindings = [
        (VERIFIER_WORKOUT_QUEUE, topics::WORKOUT_LOGGED),
        (VERIFIER_CHALLENGE_QUEUE, topics::CHALLENGE_ALL),
    ];

    for (queue, pattern) in bindings {
        let subscription = retry
            .run("verifier subscribe", || bus.subscribe(queue, pattern))
            .await;

        match subscription {
            Ok(subscription) => {
                let bus = bus.clone();
                let handler = verifier.clone();
                let max_redeliveries = config.max_redeliveries;
                tokio::spawn(async move {
                    run_consumer(bus, subscription, handler, queue, max_redeliveries).await;
                });
            }
            Err(err) => {
                tracing::error!(queue, error = %err, "Broker unreachable, verifier queue not started");
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install shutdown signal handler");
    }
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fitness_sync=debug".parse().expect("valid directive"))
                .add_directive("info".parse().expect("valid directive")),
        )
        .with(format)
        .init();
}
