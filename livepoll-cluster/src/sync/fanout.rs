use anyhow::{Context, Result};
use futures::stream::StreamExt;
use redis::{AsyncCommands, Client as RedisClient};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::PollEvent;
use super::room_hub::RoomMessageHub;

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Initial backoff delay for reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Channel prefix for per-poll events
const POLL_CHANNEL_PREFIX: &str = "livepoll:poll:";

/// Subscription pattern covering every poll channel
const POLL_CHANNEL_PATTERN: &str = "livepoll:poll:*";

/// Fan-out bus for cross-replica event delivery
///
/// This is the single delivery path for tally and lifecycle events:
/// 1. Every published event is broadcast to this process's room subscribers
///    first (same-process short-circuit, no channel round trip)
/// 2. The event then goes out on the shared Redis channel for the other
///    replicas, wrapped in a node-id envelope
/// 3. The subscriber task forwards foreign events into the local hub and
///    ignores this node's own envelopes
///
/// Delivery is at-most-once with no persistence or replay: a replica that is
/// offline when an event fires misses it permanently. That is fine because
/// every tally is a complete replacement and every join delivers a full
/// snapshot, so the next vote or re-join repairs any staleness.
///
/// An empty Redis URL degrades to local-only delivery (single replica).
pub struct FanoutBus {
    redis_client: Option<RedisClient>,
    hub: Arc<RoomMessageHub>,
    node_id: String,
    cancel_token: CancellationToken,
}

/// Request to publish an event to every replica serving its poll
pub struct PublishRequest {
    pub event: PollEvent,
}

/// Envelope for events published to Redis.
/// Includes `node_id` to avoid echo (each node ignores its own events).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct EventEnvelope {
    node_id: String,
    event: PollEvent,
}

impl FanoutBus {
    /// Capacity for the publish channel. Events are dropped with a warning
    /// when full (e.g. during a prolonged Redis outage).
    pub const PUBLISH_CHANNEL_CAPACITY: usize = 10_000;

    /// Create a new `FanoutBus`. An empty `redis_url` disables the
    /// cross-replica path.
    pub fn new(redis_url: &str, hub: Arc<RoomMessageHub>, node_id: String) -> Result<Self> {
        let redis_client = if redis_url.is_empty() {
            info!("Redis not configured, fan-out runs in local-only mode");
            None
        } else {
            Some(RedisClient::open(redis_url).context("Failed to create Redis client")?)
        };

        Ok(Self {
            redis_client,
            hub,
            node_id,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Get the cancellation token for external shutdown signaling
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Shut down the bus (cancels the dispatch, publisher and subscriber tasks)
    pub fn shutdown(&self) {
        info!("Shutting down FanoutBus");
        self.cancel_token.cancel();
    }

    /// Start the bus. Spawns the dispatch task plus, when Redis is
    /// configured, the publisher and subscriber tasks. Returns the sender
    /// used to publish events.
    pub fn start(self: Arc<Self>) -> mpsc::Sender<PublishRequest> {
        let (publish_tx, mut publish_rx) =
            mpsc::channel::<PublishRequest>(Self::PUBLISH_CHANNEL_CAPACITY);

        // Bounded relay towards Redis so a Redis outage cannot OOM us
        let redis_tx = self.redis_client.as_ref().map(|_| {
            let (tx, rx) = mpsc::channel::<PublishRequest>(Self::PUBLISH_CHANNEL_CAPACITY);
            self.clone().spawn_redis_publisher(rx);
            tx
        });

        // Dispatch task: local short-circuit, then hand off to Redis
        let hub = self.hub.clone();
        let cancel_dispatch = self.cancel_token.clone();
        tokio::spawn(async move {
            loop {
                let req = tokio::select! {
                    _ = cancel_dispatch.cancelled() => {
                        info!("Fan-out dispatch task cancelled");
                        return;
                    }
                    req = publish_rx.recv() => req,
                };
                let Some(req) = req else {
                    warn!("Fan-out publish channel closed, exiting");
                    return;
                };

                hub.broadcast(req.event.poll_id(), req.event.clone());

                if let Some(redis_tx) = &redis_tx {
                    if let Err(e) = redis_tx.try_send(req) {
                        warn!(error = %e, "Dropping cross-replica publish");
                    }
                }
            }
        });

        if self.redis_client.is_some() {
            self.clone().spawn_subscriber();
        }

        publish_tx
    }

    /// Spawn the Redis publisher task with reconnection logic
    fn spawn_redis_publisher(self: Arc<Self>, mut redis_rx: mpsc::Receiver<PublishRequest>) {
        let Some(publish_client) = self.redis_client.clone() else {
            return;
        };
        let node_id = self.node_id.clone();
        let cancel_publisher = self.cancel_token.clone();

        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;
            // Buffer for retrying a failed publish after reconnection
            let mut retry_request: Option<PublishRequest> = None;

            loop {
                let conn = match timeout(
                    Duration::from_secs(REDIS_TIMEOUT_SECS),
                    publish_client.get_multiplexed_async_connection(),
                )
                .await
                {
                    Ok(Ok(conn)) => {
                        backoff_secs = INITIAL_BACKOFF_SECS;
                        conn
                    }
                    Ok(Err(e)) => {
                        error!(
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Failed to get Redis connection for publishing, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                    Err(_) => {
                        error!(
                            backoff_secs = backoff_secs,
                            "Timed out getting Redis connection for publishing, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                };

                info!("Redis publisher task (re)connected");
                let mut conn = conn;

                // Retry the previously failed publish request if any
                if let Some(req) = retry_request.take() {
                    match Self::publish_event(&mut conn, &node_id, &req.event).await {
                        Ok(subscribers) => {
                            debug!(
                                event_type = req.event.event_type(),
                                subscribers = subscribers,
                                "Retried event published to Redis"
                            );
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                event_type = req.event.event_type(),
                                "Retry publish failed, will retry after next reconnect"
                            );
                            retry_request = Some(req);
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                            continue;
                        }
                    }
                }

                // Process events until connection breaks or cancelled
                loop {
                    let req = tokio::select! {
                        _ = cancel_publisher.cancelled() => {
                            info!("Redis publisher task cancelled");
                            return;
                        }
                        req = redis_rx.recv() => req,
                    };
                    let Some(req) = req else {
                        warn!("Redis publisher channel closed, exiting");
                        return;
                    };

                    match Self::publish_event(&mut conn, &node_id, &req.event).await {
                        Ok(subscribers) => {
                            debug!(
                                event_type = req.event.event_type(),
                                subscribers = subscribers,
                                "Event published to Redis"
                            );
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                event_type = req.event.event_type(),
                                "Failed to publish event, saving for retry after reconnect"
                            );
                            retry_request = Some(req);
                            break;
                        }
                    }
                }

                // Wait before reconnecting
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });
    }

    /// Spawn the subscriber task with exponential backoff on reconnection
    fn spawn_subscriber(self: Arc<Self>) {
        let cancel_subscriber = self.cancel_token.clone();
        let self_clone = self;

        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                if cancel_subscriber.is_cancelled() {
                    info!("Redis subscriber task cancelled");
                    return;
                }

                match self_clone.run_subscriber().await {
                    SubscriberExit::Disconnected => {
                        // Connection was healthy before it dropped.
                        // Reset backoff since the server was reachable.
                        error!(
                            "Redis subscriber stream ended (connection lost), reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Redis subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                // Wait with cancellation support
                tokio::select! {
                    _ = cancel_subscriber.cancelled() => {
                        info!("Redis subscriber task cancelled during backoff");
                        return;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });
    }

    /// Run the subscriber until the connection drops.
    ///
    /// Events missed while disconnected are gone: the contract is
    /// at-most-once, and the join-time snapshot plus the next vote repair
    /// anything a viewer missed.
    async fn run_subscriber(&self) -> SubscriberExit {
        let Some(client) = &self.redis_client else {
            return SubscriberExit::ConnectFailed(anyhow::anyhow!("Redis not configured"));
        };

        let mut pubsub = match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            client.get_async_pubsub(),
        )
        .await
        {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => {
                return SubscriberExit::ConnectFailed(
                    anyhow::anyhow!(e).context("Failed to get Redis Pub/Sub connection"),
                );
            }
            Err(_) => {
                return SubscriberExit::ConnectFailed(anyhow::anyhow!(
                    "Timed out getting Redis Pub/Sub connection"
                ));
            }
        };

        match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            pubsub.psubscribe(POLL_CHANNEL_PATTERN),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return SubscriberExit::ConnectFailed(
                    anyhow::anyhow!(e).context("Failed to subscribe to poll channels"),
                );
            }
            Err(_) => {
                return SubscriberExit::ConnectFailed(anyhow::anyhow!(
                    "Timed out subscribing to poll channels"
                ));
            }
        }

        info!(
            pattern = POLL_CHANNEL_PATTERN,
            "Redis subscriber connected, listening for poll events"
        );

        let mut stream = pubsub.on_message();

        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();

            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Invalid payload");
                    continue;
                }
            };

            match serde_json::from_str::<EventEnvelope>(&payload) {
                Ok(envelope) => {
                    // Ignore events from this node (already broadcast locally
                    // by the dispatch task)
                    if envelope.node_id == self.node_id {
                        continue;
                    }

                    let poll_id = envelope.event.poll_id().clone();
                    let sent_count = self.hub.broadcast(&poll_id, envelope.event);
                    debug!(
                        channel = %channel,
                        local_subscribers = sent_count,
                        "Forwarded Redis event to local subscribers"
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        channel = %channel,
                        payload = %payload,
                        "Failed to deserialize event envelope"
                    );
                }
            }
        }

        // Stream returned None -- the Redis connection was lost
        SubscriberExit::Disconnected
    }

    /// Publish one event to its poll channel
    async fn publish_event(
        conn: &mut redis::aio::MultiplexedConnection,
        node_id: &str,
        event: &PollEvent,
    ) -> Result<usize> {
        let channel = format!("{POLL_CHANNEL_PREFIX}{}", event.poll_id().as_str());

        let envelope = EventEnvelope {
            node_id: node_id.to_string(),
            event: event.clone(),
        };

        let payload =
            serde_json::to_string(&envelope).context("Failed to serialize event envelope")?;

        let subscribers: usize = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            conn.publish(&channel, &payload),
        )
        .await
        .context("Timed out publishing to Redis")?
        .context("Failed to publish to Redis")?;

        Ok(subscribers)
    }
}

/// Describes how the subscriber loop exited, enabling proper backoff behavior.
enum SubscriberExit {
    /// Connection was established and messages were being processed, but the
    /// stream ended (Redis disconnected). Backoff should be reset since the
    /// connection was healthy before it dropped.
    Disconnected,
    /// Failed to connect or subscribe to Redis. Backoff should continue
    /// increasing to avoid hammering an unavailable server.
    ConnectFailed(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use livepoll_core::models::{PollId, Tally, VoterId};

    fn tally() -> Tally {
        Tally::from_rows(&["Coffee".to_string(), "Tea".to_string()], &[(0, 1)])
    }

    #[test]
    fn test_event_envelope_serialization() {
        let envelope = EventEnvelope {
            node_id: "node1".to_string(),
            event: PollEvent::VoteUpdated {
                poll_id: PollId::from_string("poll12345678".to_string()),
                tally: tally(),
                timestamp: Utc::now(),
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("node1"));
        assert!(json.contains("vote_updated"));

        let deserialized: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.node_id, "node1");
        assert_eq!(deserialized.event.event_type(), "vote_updated");
    }

    #[tokio::test]
    async fn test_local_only_short_circuit() {
        // Without Redis the bus still delivers to local subscribers
        let hub = Arc::new(RoomMessageHub::new());
        let bus = Arc::new(FanoutBus::new("", hub.clone(), "node1".to_string()).unwrap());
        let publish_tx = bus.clone().start();

        let poll_id = PollId::new();
        let mut rx = hub.subscribe(poll_id.clone(), VoterId::new(), "conn1".to_string());

        publish_tx
            .send(PublishRequest {
                event: PollEvent::VoteUpdated {
                    poll_id: poll_id.clone(),
                    tally: tally(),
                    timestamp: Utc::now(),
                },
            })
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type(), "vote_updated");

        bus.shutdown();
    }

    // Integration tests require Redis running
    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_cross_node_fanout() {
        let redis_url = "redis://127.0.0.1:6379";
        let hub = Arc::new(RoomMessageHub::new());

        // Two buses simulating different nodes sharing one hub for the test
        let bus1 =
            Arc::new(FanoutBus::new(redis_url, hub.clone(), "node1".to_string()).unwrap());
        let bus2 =
            Arc::new(FanoutBus::new(redis_url, hub.clone(), "node2".to_string()).unwrap());

        let publish_tx1 = bus1.clone().start();
        let _publish_tx2 = bus2.clone().start();

        // Wait for subscriptions to establish
        tokio::time::sleep(Duration::from_millis(500)).await;

        let poll_id = PollId::new();
        let mut rx = hub.subscribe(poll_id.clone(), VoterId::new(), "conn1".to_string());

        publish_tx1
            .send(PublishRequest {
                event: PollEvent::PollClosed {
                    poll_id: poll_id.clone(),
                    timestamp: Utc::now(),
                },
            })
            .await
            .unwrap();

        // Local short-circuit from node1, plus one re-broadcast when node2's
        // subscriber forwards the foreign envelope. Either way the first
        // delivery arrives quickly and is a complete event.
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type(), "poll_closed");

        bus1.shutdown();
        bus2.shutdown();
    }
}
