use chrono::{DateTime, Utc};
use livepoll_core::models::{Comment, PollId, Tally};
use serde::{Deserialize, Serialize};

/// Events routed through the room hub.
///
/// `VoteUpdated` and `PollClosed` also cross replicas via the fan-out bus;
/// `ViewerCount` and `CommentPosted` stay on the replica that produced them
/// (presence and comments are process-local state). Every tally carried here
/// is a complete replacement, never a delta, so re-delivery and reordering
/// are harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// A vote landed; the tally is the full post-vote state
    VoteUpdated {
        poll_id: PollId,
        tally: Tally,
        timestamp: DateTime<Utc>,
    },

    /// The poll flipped open -> closed; votes are rejected from here on
    PollClosed {
        poll_id: PollId,
        timestamp: DateTime<Utc>,
    },

    /// Distinct-voter viewer count of this replica's room changed
    ViewerCount {
        poll_id: PollId,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A comment was appended to the poll's buffer
    CommentPosted {
        comment: Comment,
        timestamp: DateTime<Utc>,
    },
}

impl PollEvent {
    /// The poll this event belongs to
    #[must_use]
    pub const fn poll_id(&self) -> &PollId {
        match self {
            Self::VoteUpdated { poll_id, .. }
            | Self::PollClosed { poll_id, .. }
            | Self::ViewerCount { poll_id, .. } => poll_id,
            Self::CommentPosted { comment, .. } => &comment.poll_id,
        }
    }

    /// Get the timestamp of this event
    #[must_use]
    pub const fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::VoteUpdated { timestamp, .. }
            | Self::PollClosed { timestamp, .. }
            | Self::ViewerCount { timestamp, .. }
            | Self::CommentPosted { timestamp, .. } => timestamp,
        }
    }

    /// Get a short description of the event type
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::VoteUpdated { .. } => "vote_updated",
            Self::PollClosed { .. } => "poll_closed",
            Self::ViewerCount { .. } => "viewer_count",
            Self::CommentPosted { .. } => "comment_posted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepoll_core::models::{Tally, VoterId};

    #[test]
    fn test_vote_updated_serialization() {
        let options = vec!["Coffee".to_string(), "Tea".to_string()];
        let event = PollEvent::VoteUpdated {
            poll_id: PollId::from_string("poll12345678".to_string()),
            tally: Tally::from_rows(&options, &[(0, 1)]),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("vote_updated"));
        assert!(json.contains("Coffee"));

        let deserialized: PollEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "vote_updated");
        assert_eq!(deserialized.poll_id().as_str(), "poll12345678");
    }

    #[test]
    fn test_poll_closed_serialization() {
        let event = PollEvent::PollClosed {
            poll_id: PollId::from_string("poll12345678".to_string()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("poll_closed"));

        let deserialized: PollEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "poll_closed");
    }

    #[test]
    fn test_comment_event_carries_poll_id() {
        let comment = Comment::new(
            PollId::from_string("poll12345678".to_string()),
            VoterId::new(),
            "anon-1".to_string(),
            "hello".to_string(),
        );
        let event = PollEvent::CommentPosted {
            comment,
            timestamp: Utc::now(),
        };

        assert_eq!(event.poll_id().as_str(), "poll12345678");
        assert_eq!(event.event_type(), "comment_posted");
    }
}
