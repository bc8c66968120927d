//! Poll service: creation, lookup and listing

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::{
    models::{CreatePollRequest, Poll, PollId, PollWithTally, Tally},
    repository::{PollRepository, VoteRepository},
    Error, Result,
};

const MIN_QUESTION_LEN: usize = 5;
const MAX_QUESTION_LEN: usize = 200;
const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 10;
const MAX_OPTION_LEN: usize = 100;

#[derive(Clone)]
pub struct PollService {
    polls: Arc<PollRepository>,
    votes: Arc<VoteRepository>,
}

impl PollService {
    #[must_use]
    pub const fn new(polls: Arc<PollRepository>, votes: Arc<VoteRepository>) -> Self {
        Self { polls, votes }
    }

    /// Create a poll. The option list is immutable from here on.
    pub async fn create_poll(&self, request: CreatePollRequest) -> Result<Poll> {
        let question = request.question.trim().to_string();
        if question.chars().count() < MIN_QUESTION_LEN
            || question.chars().count() > MAX_QUESTION_LEN
        {
            return Err(Error::InvalidInput(format!(
                "Question must be {MIN_QUESTION_LEN}-{MAX_QUESTION_LEN} characters"
            )));
        }

        if request.options.len() < MIN_OPTIONS || request.options.len() > MAX_OPTIONS {
            return Err(Error::InvalidInput(format!(
                "A poll needs {MIN_OPTIONS}-{MAX_OPTIONS} options"
            )));
        }

        let options: Vec<String> = request
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .collect();
        if options
            .iter()
            .any(|o| o.is_empty() || o.chars().count() > MAX_OPTION_LEN)
        {
            return Err(Error::InvalidInput(format!(
                "Each option must be 1-{MAX_OPTION_LEN} characters"
            )));
        }

        if request.expires_at <= Utc::now() {
            return Err(Error::InvalidInput(
                "Expiration time must be in the future".to_string(),
            ));
        }

        let poll = self
            .polls
            .create(&Poll::new(question, options, request.expires_at))
            .await?;

        info!(
            poll_id = poll.id.as_str(),
            expires_at = %poll.expires_at,
            "Poll created"
        );

        Ok(poll)
    }

    /// Poll plus its derived tally
    pub async fn get_poll(&self, poll_id: &PollId) -> Result<PollWithTally> {
        let poll = self
            .polls
            .get(poll_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Poll {poll_id} not found")))?;

        let rows = self.votes.counts_by_option(poll_id).await?;
        let tally = Tally::from_rows(&poll.options, &rows);
        Ok(PollWithTally { poll, tally })
    }

    /// Open, unexpired polls with tallies, newest first
    pub async fn list_open(&self, limit: i64) -> Result<Vec<PollWithTally>> {
        let polls = self.polls.list_open(Utc::now(), limit).await?;

        let mut result = Vec::with_capacity(polls.len());
        for poll in polls {
            let rows = self.votes.counts_by_option(&poll.id).await?;
            let tally = Tally::from_rows(&poll.options, &rows);
            result.push(PollWithTally { poll, tally });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_create_poll_rejects_past_expiry() {
        // Integration test placeholder
    }
}
