use dashmap::DashMap;
use livepoll_core::models::{PollId, VoterId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::PollEvent;

/// Handle for a client connection subscription
pub type ConnectionId = String;

/// Message sender for a client connection
pub type MessageSender = mpsc::UnboundedSender<PollEvent>;

/// Subscriber information
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub voter_id: VoterId,
    pub sender: MessageSender,
}

/// In-memory hub for routing events to connected clients in poll rooms.
/// This handles local message distribution (single node); cross-node
/// delivery arrives through the fan-out bus and is re-broadcast here.
#[derive(Clone)]
pub struct RoomMessageHub {
    /// Map of poll_id -> list of subscribers
    rooms: Arc<DashMap<PollId, Vec<Subscriber>>>,

    /// Map of connection_id -> (poll_id, voter_id) for cleanup
    connections: Arc<DashMap<ConnectionId, (PollId, VoterId)>>,
}

impl RoomMessageHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe a connection to a poll room's events.
    /// Returns a receiver for messages. A connection subscribes to one room
    /// at a time; re-subscribing under the same connection id replaces the
    /// old subscription.
    pub fn subscribe(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        connection_id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<PollEvent> {
        // Drop any previous subscription for this connection
        self.unsubscribe_quiet(&connection_id);

        let (tx, rx) = mpsc::unbounded_channel();

        let subscriber = Subscriber {
            connection_id: connection_id.clone(),
            voter_id: voter_id.clone(),
            sender: tx,
        };

        self.rooms
            .entry(poll_id.clone())
            .or_default()
            .push(subscriber);

        self.connections
            .insert(connection_id.clone(), (poll_id.clone(), voter_id.clone()));

        info!(
            poll_id = %poll_id.as_str(),
            voter_id = %voter_id.as_str(),
            connection_id = %connection_id,
            "Connection subscribed to poll room"
        );

        rx
    }

    /// Unsubscribe a connection from its room
    pub fn unsubscribe(&self, connection_id: &str) {
        if let Some((poll_id, voter_id)) = self.remove_subscription(connection_id) {
            info!(
                poll_id = %poll_id.as_str(),
                voter_id = %voter_id.as_str(),
                connection_id = %connection_id,
                "Connection unsubscribed from poll room"
            );
        } else {
            warn!(
                connection_id = %connection_id,
                "Attempted to unsubscribe unknown connection"
            );
        }
    }

    /// Unsubscribe without the unknown-connection warning, used when a
    /// connection switches rooms and may not have had a subscription yet.
    fn unsubscribe_quiet(&self, connection_id: &str) {
        self.remove_subscription(connection_id);
    }

    fn remove_subscription(&self, connection_id: &str) -> Option<(PollId, VoterId)> {
        let (_, (poll_id, voter_id)) = self.connections.remove(connection_id)?;

        if let Some(mut subscribers) = self.rooms.get_mut(&poll_id) {
            subscribers.retain(|sub| sub.connection_id != connection_id);

            if subscribers.is_empty() {
                drop(subscribers); // Drop the RefMut before removing
                self.rooms.remove_if(&poll_id, |_, subs| subs.is_empty());
                debug!(poll_id = %poll_id.as_str(), "Room has no more subscribers, removed");
            }
        }

        Some((poll_id, voter_id))
    }

    /// Broadcast an event to all subscribers in a poll room.
    /// A failed send never propagates; the dead connection is cleaned up.
    pub fn broadcast(&self, poll_id: &PollId, event: PollEvent) -> usize {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        if let Some(subscribers) = self.rooms.get(poll_id) {
            for subscriber in subscribers.iter() {
                match subscriber.sender.send(event.clone()) {
                    Ok(()) => {
                        sent_count += 1;
                    }
                    Err(err) => {
                        warn!(
                            poll_id = %poll_id.as_str(),
                            connection_id = %subscriber.connection_id,
                            error = %err,
                            "Failed to send event to client, marking for cleanup"
                        );
                        failed_connections.push(subscriber.connection_id.clone());
                    }
                }
            }
        }

        // Clean up failed connections
        for conn_id in failed_connections {
            self.unsubscribe(&conn_id);
        }

        if sent_count > 0 {
            debug!(
                poll_id = %poll_id.as_str(),
                sent_count = sent_count,
                event_type = %event.event_type(),
                "Event broadcast complete"
            );
        }

        sent_count
    }

    /// Get the number of subscribed connections in a poll room
    #[must_use]
    pub fn subscriber_count(&self, poll_id: &PollId) -> usize {
        self.rooms
            .get(poll_id)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Get the number of active rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get total number of active connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for RoomMessageHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vote_event(poll_id: &PollId) -> PollEvent {
        PollEvent::ViewerCount {
            poll_id: poll_id.clone(),
            count: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let hub = RoomMessageHub::new();
        let poll_id = PollId::new();
        let voter_id = VoterId::new();

        let mut rx = hub.subscribe(poll_id.clone(), voter_id, "conn1".to_string());

        assert_eq!(hub.subscriber_count(&poll_id), 1);
        assert_eq!(hub.connection_count(), 1);

        let sent_count = hub.broadcast(&poll_id, vote_event(&poll_id));
        assert_eq!(sent_count, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "viewer_count");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = RoomMessageHub::new();
        let poll_id = PollId::new();

        let _rx = hub.subscribe(poll_id.clone(), VoterId::new(), "conn1".to_string());
        assert_eq!(hub.subscriber_count(&poll_id), 1);

        hub.unsubscribe("conn1");
        assert_eq!(hub.subscriber_count(&poll_id), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let hub = RoomMessageHub::new();
        let poll_id = PollId::new();

        let mut rx1 = hub.subscribe(poll_id.clone(), VoterId::new(), "conn1".to_string());
        let mut rx2 = hub.subscribe(poll_id.clone(), VoterId::new(), "conn2".to_string());

        assert_eq!(hub.subscriber_count(&poll_id), 2);

        let sent_count = hub.broadcast(&poll_id, vote_event(&poll_id));
        assert_eq!(sent_count, 2);

        assert_eq!(rx1.recv().await.unwrap().event_type(), "viewer_count");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "viewer_count");
    }

    #[tokio::test]
    async fn test_resubscribe_moves_connection() {
        let hub = RoomMessageHub::new();
        let poll1 = PollId::new();
        let poll2 = PollId::new();
        let voter = VoterId::new();

        let _rx1 = hub.subscribe(poll1.clone(), voter.clone(), "conn1".to_string());
        let mut rx2 = hub.subscribe(poll2.clone(), voter, "conn1".to_string());

        // Old subscription replaced, old room cleaned up
        assert_eq!(hub.subscriber_count(&poll1), 0);
        assert_eq!(hub.subscriber_count(&poll2), 1);
        assert_eq!(hub.connection_count(), 1);

        hub.broadcast(&poll2, vote_event(&poll2));
        assert_eq!(rx2.recv().await.unwrap().poll_id(), &poll2);
    }

    #[tokio::test]
    async fn test_broadcast_cleans_up_dead_connections() {
        let hub = RoomMessageHub::new();
        let poll_id = PollId::new();

        let rx = hub.subscribe(poll_id.clone(), VoterId::new(), "conn1".to_string());
        drop(rx);

        let sent_count = hub.broadcast(&poll_id, vote_event(&poll_id));
        assert_eq!(sent_count, 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
