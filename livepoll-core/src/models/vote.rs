use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{PollId, VoterId};

/// One voter's current choice in one poll. (poll_id, voter_id) is the
/// storage primary key: repeat casts overwrite, never duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub option_index: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub option_index: i32,
}
