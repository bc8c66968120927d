//! WebSocket event surface
//!
//! One connection serves any number of sequential poll rooms: clients send
//! `join_poll` / `leave_poll` / `send_comment` and receive `poll_data`,
//! `vote_update`, `viewer_count`, `new_comment`, `comment_history` and
//! `poll_closed`. Joining delivers a full snapshot, which is also what
//! repairs any update a replica missed while offline.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::http::poll::PollResponse;
use crate::http::{AppError, AppState};
use livepoll_cluster::{ConnectionId, PollEvent, RoomCount};
use livepoll_core::models::{generate_id, Comment, OptionCount, PollId, VoterId};
use livepoll_core::Error;

/// Interval for keep-alive pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound buffer per connection; slow consumers drop messages rather than
/// stalling the broadcast path
const OUTBOUND_BUFFER: usize = 256;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Voter token for authentication
    pub token: Option<String>,
}

/// Inbound client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinPoll { poll_id: String },
    LeavePoll { poll_id: String },
    SendComment { poll_id: String, text: String },
}

/// Outbound server events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PollData {
        poll: PollResponse,
    },
    CommentHistory {
        poll_id: String,
        comments: Vec<Comment>,
    },
    VoteUpdate {
        poll_id: String,
        results: Vec<OptionCount>,
        total_votes: i64,
    },
    ViewerCount {
        poll_id: String,
        count: usize,
    },
    NewComment {
        comment: Comment,
    },
    PollClosed {
        poll_id: String,
    },
    Error {
        message: String,
    },
}

impl From<PollEvent> for ServerEvent {
    fn from(event: PollEvent) -> Self {
        match event {
            PollEvent::VoteUpdated { poll_id, tally, .. } => Self::VoteUpdate {
                poll_id: poll_id.as_str().to_string(),
                results: tally.counts,
                total_votes: tally.total,
            },
            PollEvent::PollClosed { poll_id, .. } => Self::PollClosed {
                poll_id: poll_id.as_str().to_string(),
            },
            PollEvent::ViewerCount { poll_id, count, .. } => Self::ViewerCount {
                poll_id: poll_id.as_str().to_string(),
                count,
            },
            PollEvent::CommentPosted { comment, .. } => Self::NewComment { comment },
        }
    }
}

/// WebSocket handler for poll realtime updates
///
/// Clients provide their token via query parameter:
/// `ws://host/api/ws?token={token}`
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .ok_or_else(|| AppError::unauthorized("Missing token query parameter"))?;

    let claims = state.token_service.verify(&token)?;

    // Limit max message size to 64KB (comments cap at 500 chars anyway)
    Ok(ws
        .max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state, claims.voter_id(), claims.name)))
}

async fn handle_socket(socket: WebSocket, state: AppState, voter_id: VoterId, voter_name: String) {
    let connection_id: ConnectionId = generate_id();

    info!(
        voter_id = voter_id.as_str(),
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    // Writer task: serialize outbound events, keep the connection alive
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                event = out_rx.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to serialize server event");
                        }
                    }
                }
                _ = ping.tick() => {
                    if ws_sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = WsSession {
        state,
        voter_id: voter_id.clone(),
        voter_name,
        connection_id: connection_id.clone(),
        current_poll: None,
        out_tx,
        forward_task: None,
    };

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {
                // Binary, ping and pong frames are ignored
            }
        }
    }

    session.on_disconnect();
    writer.abort();

    info!(
        voter_id = voter_id.as_str(),
        connection_id = %connection_id,
        "WebSocket connection closed"
    );
}

/// Per-connection session state
struct WsSession {
    state: AppState,
    voter_id: VoterId,
    voter_name: String,
    connection_id: ConnectionId,
    current_poll: Option<PollId>,
    out_tx: mpsc::Sender<ServerEvent>,
    forward_task: Option<JoinHandle<()>>,
}

impl WsSession {
    async fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Ignoring malformed client event"
                );
                return;
            }
        };

        match event {
            ClientEvent::JoinPoll { poll_id } => {
                self.join_poll(PollId::from_string(poll_id)).await;
            }
            ClientEvent::LeavePoll { poll_id } => {
                self.leave_poll(&PollId::from_string(poll_id));
            }
            ClientEvent::SendComment { poll_id, text } => {
                self.send_comment(PollId::from_string(poll_id), &text);
            }
        }
    }

    async fn join_poll(&mut self, poll_id: PollId) {
        // Validate the poll and build the snapshot before touching room state
        let snapshot = match self.state.poll_service.get_poll(&poll_id).await {
            Ok(snapshot) => snapshot,
            Err(Error::NotFound(_)) => {
                self.send(ServerEvent::Error {
                    message: "Poll not found".to_string(),
                });
                return;
            }
            Err(e) => {
                error!(poll_id = poll_id.as_str(), error = %e, "Failed to join poll");
                self.send(ServerEvent::Error {
                    message: "Failed to join poll".to_string(),
                });
                return;
            }
        };

        // Re-point this connection's subscription at the new room
        let rx = self.state.message_hub.subscribe(
            poll_id.clone(),
            self.voter_id.clone(),
            self.connection_id.clone(),
        );
        self.spawn_forwarder(rx);

        // Presence evicts the voter from any previous room; tell that room
        let outcome = self.state.presence.join(&self.voter_id, &poll_id);
        if let Some(previous) = outcome.previous {
            if previous.viewers > 0 {
                self.broadcast_viewer_count(&previous);
            }
        }

        // Snapshot to the joining connection: poll, tally and comments
        self.send(ServerEvent::PollData {
            poll: snapshot.into(),
        });
        self.send(ServerEvent::CommentHistory {
            poll_id: poll_id.as_str().to_string(),
            comments: self.state.comment_log.history(&poll_id),
        });

        // New viewer count to the whole room, this connection included
        self.broadcast_viewer_count(&outcome.joined);
        self.current_poll = Some(poll_id.clone());

        info!(
            voter_id = self.voter_id.as_str(),
            poll_id = poll_id.as_str(),
            viewers = outcome.joined.viewers,
            "Voter joined poll"
        );
    }

    fn leave_poll(&mut self, poll_id: &PollId) {
        if self.current_poll.as_ref() == Some(poll_id) {
            self.state.message_hub.unsubscribe(&self.connection_id);
            if let Some(task) = self.forward_task.take() {
                task.abort();
            }
            self.current_poll = None;
        }

        if let Some(room) = self.state.presence.leave(&self.voter_id, poll_id) {
            if room.viewers > 0 {
                self.broadcast_viewer_count(&room);
            }
        }

        info!(
            voter_id = self.voter_id.as_str(),
            poll_id = poll_id.as_str(),
            "Voter left poll"
        );
    }

    fn send_comment(&self, poll_id: PollId, text: &str) {
        match self.state.comment_log.append(
            poll_id.clone(),
            self.voter_id.clone(),
            self.voter_name.clone(),
            text,
        ) {
            Ok(comment) => {
                let event = PollEvent::CommentPosted {
                    comment,
                    timestamp: Utc::now(),
                };
                self.state.message_hub.broadcast(&poll_id, event);
            }
            Err(e) => {
                // Malformed comments are dropped without a reply to the sender
                debug!(
                    voter_id = self.voter_id.as_str(),
                    poll_id = poll_id.as_str(),
                    error = %e,
                    "Comment rejected"
                );
            }
        }
    }

    /// Session teardown. Membership does not survive the connection; a new
    /// connection has to join again explicitly.
    fn on_disconnect(&mut self) {
        if self.current_poll.take().is_some() {
            self.state.message_hub.unsubscribe(&self.connection_id);
        }
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }

        if let Some(room) = self.state.presence.on_disconnect(&self.voter_id) {
            if room.viewers > 0 {
                self.broadcast_viewer_count(&room);
            }
        }
    }

    /// Forward hub events for the subscribed room into this connection
    fn spawn_forwarder(&mut self, mut rx: mpsc::UnboundedReceiver<PollEvent>) {
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }

        let out_tx = self.out_tx.clone();
        self.forward_task = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if out_tx.send(ServerEvent::from(event)).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn broadcast_viewer_count(&self, room: &RoomCount) {
        self.state.message_hub.broadcast(
            &room.poll_id,
            PollEvent::ViewerCount {
                poll_id: room.poll_id.clone(),
                count: room.viewers,
                timestamp: Utc::now(),
            },
        );
    }

    /// Queue an event for this connection. try_send keeps a slow client from
    /// stalling the room; dropped updates are repaired by the next snapshot.
    fn send(&self, event: ServerEvent) {
        if let Err(e) = self.out_tx.try_send(event) {
            warn!(
                connection_id = %self.connection_id,
                error = %e,
                "Dropping event for slow WebSocket client"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepoll_core::models::Tally;

    #[test]
    fn test_client_event_tags() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join_poll","poll_id":"poll12345678"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinPoll { .. }));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send_comment","poll_id":"poll12345678","text":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::SendComment { .. }));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"unknown"}"#).is_err());
    }

    #[test]
    fn test_server_event_tags() {
        let event = ServerEvent::ViewerCount {
            poll_id: "poll12345678".to_string(),
            count: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"viewer_count""#));

        let event = ServerEvent::PollClosed {
            poll_id: "poll12345678".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"poll_closed""#));
    }

    #[test]
    fn test_vote_update_from_poll_event() {
        let options = vec!["Coffee".to_string(), "Tea".to_string()];
        let event = PollEvent::VoteUpdated {
            poll_id: PollId::from_string("poll12345678".to_string()),
            tally: Tally::from_rows(&options, &[(0, 2), (1, 1)]),
            timestamp: Utc::now(),
        };

        let server_event = ServerEvent::from(event);
        match server_event {
            ServerEvent::VoteUpdate {
                poll_id,
                results,
                total_votes,
            } => {
                assert_eq!(poll_id, "poll12345678");
                assert_eq!(results.len(), 2);
                assert_eq!(total_votes, 3);
            }
            other => panic!("Expected VoteUpdate, got {other:?}"),
        }

        let json = serde_json::to_string(&ServerEvent::from(PollEvent::PollClosed {
            poll_id: PollId::from_string("p".to_string()),
            timestamp: Utc::now(),
        }))
        .unwrap();
        assert!(json.contains("poll_closed"));
    }
}
