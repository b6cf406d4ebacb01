// SPDX-License-Identifier: MIT

//! MQTT implementation of the message fabric, using rumqttc.
//!
//! Mapping of the broker contract onto MQTT:
//! - routing keys become topic paths under the exchange name
//!   (`workout.logged` -> `fitness_events/workout/logged`), and the `*`
//!   binding wildcard becomes `+`;
//! - a durable queue is a persistent session whose client id is the queue
//!   name (`clean_session(false)`), so the broker keeps undelivered QoS 1
//!   messages across consumer restarts;
//! - persistent delivery is QoS 1 (at-least-once) with manual acks;
//! - reject-without-requeue settles the message without processing it, the
//!   MQTT equivalent of a nack with requeue disabled;
//! - each queue also listens on a private requeue topic
//!   (`fitness_events/requeue/<queue>/...`) so a failed delivery can be
//!   handed back to that one queue without re-entering topic fan-out.
//!
//! The publisher side holds a typed connection state behind a mutex: one
//! reconnect routine, no concurrent reconnect attempts, and any failure
//! resets the state to `Disconnected` so the next publish retries a fresh
//! connect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{BusError, BusSubscription, Delivery, MessageBus, EXCHANGE_NAME};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 64;
/// Pause before re-polling the event loop after a connection error, so a
/// dead broker does not spin the consumer.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Translate a dot-separated routing key to an MQTT topic path.
fn to_mqtt_topic(routing_key: &str) -> String {
    format!("{}/{}", EXCHANGE_NAME, routing_key.replace('.', "/"))
}

/// Translate a binding pattern (`challenge.*`) to an MQTT filter.
fn to_mqtt_filter(pattern: &str) -> String {
    format!(
        "{}/{}",
        EXCHANGE_NAME,
        pattern.replace('.', "/").replace('*', "+")
    )
}

/// Topic prefix for deliveries aimed at one queue only.
fn requeue_prefix(queue: &str) -> String {
    format!("{EXCHANGE_NAME}/requeue/{queue}")
}

/// Translate an incoming MQTT topic back to a routing key.
fn from_mqtt_topic(topic: &str) -> String {
    topic
        .strip_prefix(&format!("{EXCHANGE_NAME}/"))
        .unwrap_or(topic)
        .replace('/', ".")
}

/// Parse `mqtt://host:port` (scheme and port optional) into host and port.
fn parse_broker_url(url: &str) -> Result<(String, u16), BusError> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    let (host, port) = match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| BusError::Connect(format!("invalid broker port in {url}")))?;
            (host, port)
        }
        None => (stripped, 1883),
    };
    if host.is_empty() {
        return Err(BusError::Connect(format!("invalid broker URL {url}")));
    }
    Ok((host.to_string(), port))
}

/// Publisher connection lifecycle.
enum PublisherState {
    Disconnected,
    Connecting,
    Connected(PublisherConn),
}

struct PublisherConn {
    client: AsyncClient,
    /// Cleared by the driver task when the event loop errors out.
    alive: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl Drop for PublisherConn {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// MQTT-backed message fabric handle.
#[derive(Clone)]
pub struct MqttBus {
    host: String,
    port: u16,
    client_id: String,
    connect_timeout: Duration,
    publisher: Arc<Mutex<PublisherState>>,
}

impl MqttBus {
    /// Create a bus handle for `broker_url`. No connection is made until the
    /// first publish or subscribe.
    ///
    /// `client_id` names the publishing session on the broker; consuming
    /// sessions are named after their queue instead.
    pub fn new(broker_url: &str, client_id: &str) -> Result<Self, BusError> {
        let (host, port) = parse_broker_url(broker_url)?;
        Ok(Self {
            host,
            port,
            client_id: client_id.to_string(),
            connect_timeout: Duration::from_secs(10),
            publisher: Arc::new(Mutex::new(PublisherState::Disconnected)),
        })
    }

    /// Override the connect/subscribe timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open a session and wait for the broker to accept it.
    async fn open_session(
        &self,
        client_id: &str,
        clean_session: bool,
        manual_acks: bool,
    ) -> Result<(AsyncClient, EventLoop), BusError> {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(clean_session);
        options.set_manual_acks(manual_acks);

        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        let wait_connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(BusError::Connect(err.to_string())),
                }
            }
        };
        match tokio::time::timeout(self.connect_timeout, wait_connack).await {
            Ok(Ok(())) => Ok((client, eventloop)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(BusError::Connect(format!(
                "timed out connecting to {}:{}",
                self.host, self.port
            ))),
        }
    }

    /// Eagerly open the publishing connection.
    ///
    /// The publish path reconnects lazily on its own; this exists so startup
    /// can front-load the connect under a bounded retry and then degrade to
    /// lazy mode if the broker stays down.
    pub async fn connect(&self) -> Result<(), BusError> {
        let mut state = self.publisher.lock().await;
        if let PublisherState::Connected(conn) = &*state {
            if conn.alive.load(Ordering::Relaxed) {
                return Ok(());
            }
        }
        *state = PublisherState::Connecting;
        match self.connect_publisher().await {
            Ok(conn) => {
                *state = PublisherState::Connected(conn);
                Ok(())
            }
            Err(err) => {
                *state = PublisherState::Disconnected;
                Err(err)
            }
        }
    }

    /// Publish with the live connection, reconnecting once if necessary.
    async fn publish_raw(&self, topic: String, body: &[u8]) -> Result<(), BusError> {
        let mut state = self.publisher.lock().await;

        // Fast path: reuse the live connection.
        if let PublisherState::Connected(conn) = &*state {
            if conn.alive.load(Ordering::Relaxed) {
                match conn
                    .client
                    .publish(&topic, QoS::AtLeastOnce, false, body.to_vec())
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "Publish on live channel failed");
                        *state = PublisherState::Disconnected;
                    }
                }
            } else {
                *state = PublisherState::Disconnected;
            }
        }

        // One reconnect attempt per call; the mutex serializes concurrent
        // callers onto a single connect.
        *state = PublisherState::Connecting;
        let conn = match self.connect_publisher().await {
            Ok(conn) => conn,
            Err(err) => {
                *state = PublisherState::Disconnected;
                return Err(err);
            }
        };

        match conn
            .client
            .publish(&topic, QoS::AtLeastOnce, false, body.to_vec())
            .await
        {
            Ok(()) => {
                *state = PublisherState::Connected(conn);
                Ok(())
            }
            Err(err) => {
                *state = PublisherState::Disconnected;
                Err(BusError::Publish(err.to_string()))
            }
        }
    }

    async fn connect_publisher(&self) -> Result<PublisherConn, BusError> {
        let (client, mut eventloop) = self
            .open_session(&self.client_id, true, false)
            .await?;

        let alive = Arc::new(AtomicBool::new(true));
        let driver_alive = Arc::clone(&alive);
        let driver = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    tracing::warn!(error = %err, "Publisher event loop error, marking connection dead");
                    driver_alive.store(false, Ordering::Relaxed);
                    return;
                }
            }
        });

        tracing::info!(host = %self.host, port = self.port, "Connected to broker for publishing");
        Ok(PublisherConn {
            client,
            alive,
            driver,
        })
    }
}

impl MessageBus for MqttBus {
    type Subscription = MqttSubscription;

    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BusError> {
        self.publish_raw(to_mqtt_topic(routing_key), body).await
    }

    async fn publish_to_queue(
        &self,
        queue: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BusError> {
        let topic = format!(
            "{}/{}",
            requeue_prefix(queue),
            routing_key.replace('.', "/")
        );
        self.publish_raw(topic, body).await
    }

    async fn subscribe(&self, queue: &str, pattern: &str) -> Result<MqttSubscription, BusError> {
        let (client, eventloop) = self.open_session(queue, false, true).await?;

        let filter = to_mqtt_filter(pattern);
        client
            .subscribe(&filter, QoS::AtLeastOnce)
            .await
            .map_err(|err| BusError::Subscribe(err.to_string()))?;

        // Private channel for deliveries handed back to this queue alone.
        client
            .subscribe(format!("{}/#", requeue_prefix(queue)), QoS::AtLeastOnce)
            .await
            .map_err(|err| BusError::Subscribe(err.to_string()))?;

        tracing::info!(queue, pattern, filter, "Bound durable queue");
        Ok(MqttSubscription {
            client,
            eventloop,
            inflight: None,
            queue: queue.to_string(),
            requeue_prefix: format!("{}/", requeue_prefix(queue)),
        })
    }
}

/// A durable consuming session. Holds at most one unacked delivery.
pub struct MqttSubscription {
    client: AsyncClient,
    eventloop: EventLoop,
    inflight: Option<Publish>,
    queue: String,
    requeue_prefix: String,
}

impl BusSubscription for MqttSubscription {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Requeued copies arrive on the private per-queue topic;
                    // strip that prefix to recover the original routing key.
                    let topic = publish
                        .topic
                        .strip_prefix(&self.requeue_prefix)
                        .unwrap_or(&publish.topic);
                    let delivery = Delivery {
                        routing_key: from_mqtt_topic(topic),
                        body: publish.payload.to_vec(),
                    };
                    self.inflight = Some(publish);
                    return Ok(delivery);
                }
                Ok(_) => {}
                Err(err) => {
                    // The event loop reconnects on the next poll; the
                    // persistent session keeps the binding and backlog.
                    tracing::warn!(
                        queue = %self.queue,
                        error = %err,
                        "Consumer connection error, reconnecting"
                    );
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn ack(&mut self) -> Result<(), BusError> {
        if let Some(publish) = self.inflight.take() {
            self.client
                .ack(&publish)
                .await
                .map_err(|err| BusError::Ack(err.to_string()))?;
        }
        Ok(())
    }

    async fn reject(&mut self) -> Result<(), BusError> {
        // MQTT settles by acknowledging; not requeueing is exactly the
        // nack(requeue=false) contract.
        if let Some(publish) = self.inflight.take() {
            tracing::debug!(queue = %self.queue, topic = %publish.topic, "Dropping delivery without requeue");
            self.client
                .ack(&publish)
                .await
                .map_err(|err| BusError::Ack(err.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_translation() {
        assert_eq!(to_mqtt_topic("workout.logged"), "fitness_events/workout/logged");
        assert_eq!(
            to_mqtt_topic("challenge.completed"),
            "fitness_events/challenge/completed"
        );
    }

    #[test]
    fn test_filter_translation_maps_wildcard() {
        assert_eq!(to_mqtt_filter("challenge.*"), "fitness_events/challenge/+");
        assert_eq!(to_mqtt_filter("workout.logged"), "fitness_events/workout/logged");
    }

    #[test]
    fn test_requeue_topic_recovers_routing_key() {
        let topic = format!(
            "{}/{}",
            requeue_prefix("challenge-service-workouts"),
            "workout.logged".replace('.', "/")
        );
        assert_eq!(
            topic,
            "fitness_events/requeue/challenge-service-workouts/workout/logged"
        );

        let prefix = format!("{}/", requeue_prefix("challenge-service-workouts"));
        let stripped = topic.strip_prefix(&prefix).unwrap();
        assert_eq!(from_mqtt_topic(stripped), "workout.logged");
    }

    #[test]
    fn test_topic_round_trip() {
        for key in ["workout.logged", "challenge.progress", "challenge.completed"] {
            assert_eq!(from_mqtt_topic(&to_mqtt_topic(key)), key);
        }
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_broker() {
        let bus = MqttBus::new("mqtt://127.0.0.1:1", "connect-test")
            .unwrap()
            .with_connect_timeout(Duration::from_millis(200));

        assert!(bus.connect().await.is_err());
        // The state resets, so a later call retries a fresh connect.
        assert!(bus.connect().await.is_err());
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://rabbitmq:1883").unwrap(),
            ("rabbitmq".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://broker:2883").unwrap(),
            ("broker".to_string(), 2883)
        );
        assert!(parse_broker_url("mqtt://broker:notaport").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }
}
