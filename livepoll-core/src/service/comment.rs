//! Bounded per-poll comment buffers
//!
//! Comments are ephemeral chat alongside a poll: held in memory on the
//! replica that received them, capped at 100 per poll (FIFO), gone on
//! restart. History hydrates newly joined viewers.

use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::info;

use crate::{
    models::{Comment, PollId, VoterId, COMMENT_BUFFER_CAPACITY, MAX_COMMENT_LEN},
    Error, Result,
};

#[derive(Default)]
pub struct CommentLog {
    buffers: DashMap<PollId, VecDeque<Comment>>,
}

impl CommentLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: DashMap::new(),
        }
    }

    /// Validate, truncate and store a comment; returns it for broadcast.
    ///
    /// Empty or whitespace-only text is rejected. Overlong text is truncated
    /// to [`MAX_COMMENT_LEN`] characters rather than rejected. Once a poll's
    /// buffer exceeds [`COMMENT_BUFFER_CAPACITY`], the oldest entry is
    /// evicted.
    pub fn append(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        voter_name: String,
        text: &str,
    ) -> Result<Comment> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput(
                "Comment text cannot be empty".to_string(),
            ));
        }

        let text: String = trimmed.chars().take(MAX_COMMENT_LEN).collect();
        let comment = Comment::new(poll_id.clone(), voter_id, voter_name, text);

        let mut buffer = self.buffers.entry(poll_id.clone()).or_default();
        buffer.push_back(comment.clone());
        while buffer.len() > COMMENT_BUFFER_CAPACITY {
            buffer.pop_front();
        }

        info!(
            poll_id = poll_id.as_str(),
            comment_id = %comment.id,
            "Comment stored"
        );

        Ok(comment)
    }

    /// Comment history for a poll, oldest first
    #[must_use]
    pub fn history(&self, poll_id: &PollId) -> Vec<Comment> {
        self.buffers
            .get(poll_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of polls with at least one buffered comment
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_poll() -> (CommentLog, PollId, VoterId) {
        (CommentLog::new(), PollId::new(), VoterId::new())
    }

    #[test]
    fn test_append_and_history() {
        let (log, poll_id, voter_id) = log_with_poll();

        log.append(poll_id.clone(), voter_id.clone(), "anon-1".to_string(), "first")
            .unwrap();
        log.append(poll_id.clone(), voter_id, "anon-1".to_string(), "second")
            .unwrap();

        let history = log.history(&poll_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "first");
        assert_eq!(history[1].text, "second");
    }

    #[test]
    fn test_rejects_whitespace_only() {
        let (log, poll_id, voter_id) = log_with_poll();
        let result = log.append(poll_id, voter_id, "anon-1".to_string(), "   \t\n");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_truncates_to_limit() {
        let (log, poll_id, voter_id) = log_with_poll();
        let long = "x".repeat(MAX_COMMENT_LEN + 50);
        let comment = log
            .append(poll_id, voter_id, "anon-1".to_string(), &long)
            .unwrap();
        assert_eq!(comment.text.chars().count(), MAX_COMMENT_LEN);
    }

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let (log, poll_id, voter_id) = log_with_poll();

        for i in 0..105 {
            log.append(
                poll_id.clone(),
                voter_id.clone(),
                "anon-1".to_string(),
                &format!("comment {i}"),
            )
            .unwrap();
        }

        let history = log.history(&poll_id);
        assert_eq!(history.len(), COMMENT_BUFFER_CAPACITY);
        assert_eq!(history[0].text, "comment 5");
        assert_eq!(history[99].text, "comment 104");
    }

    #[test]
    fn test_history_for_unknown_poll_is_empty() {
        let log = CommentLog::new();
        assert!(log.history(&PollId::new()).is_empty());
    }
}
