use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{PollId, VoterId};

/// Longest accepted comment body; longer input is truncated, not rejected.
pub const MAX_COMMENT_LEN: usize = 500;

/// Per-poll comment buffer capacity; the oldest entry is evicted beyond this.
pub const COMMENT_BUFFER_CAPACITY: usize = 100;

/// Chat-style comment on a poll. Held in a bounded in-memory buffer only,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String, // nanoid(12)
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub voter_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(poll_id: PollId, voter_id: VoterId, voter_name: String, text: String) -> Self {
        Self {
            id: super::id::generate_id(),
            poll_id,
            voter_id,
            voter_name,
            text,
            timestamp: Utc::now(),
        }
    }
}
