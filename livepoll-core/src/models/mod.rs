pub mod comment;
pub mod id;
pub mod poll;
pub mod vote;

pub use comment::{Comment, COMMENT_BUFFER_CAPACITY, MAX_COMMENT_LEN};
pub use id::{generate_id, PollId, VoterId};
pub use poll::{CreatePollRequest, OptionCount, Poll, PollStatus, PollWithTally, Tally};
pub use vote::{CastVoteRequest, Vote};
