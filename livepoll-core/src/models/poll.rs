use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::PollId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum PollStatus {
    #[default]
    Open,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::str::FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown poll status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    /// Immutable ordered option labels; vote rows reference them by index.
    pub options: Vec<String>,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(question: String, options: Vec<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: PollId::new(),
            question,
            options,
            status: PollStatus::Open,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether the poll still accepts votes at `now`.
    pub fn accepts_votes_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Per-option share of the tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionCount {
    pub option: String,
    pub count: i64,
}

/// Vote tally derived from the current vote rows. Never stored: recomputed
/// on every read so repeated casts by one voter can never inflate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub counts: Vec<OptionCount>,
    pub total: i64,
}

impl Tally {
    /// Build a tally from grouped (option_index, count) rows, zero-filling
    /// options nobody has voted for.
    pub fn from_rows(options: &[String], rows: &[(i32, i64)]) -> Self {
        let counts: Vec<OptionCount> = options
            .iter()
            .enumerate()
            .map(|(index, option)| OptionCount {
                option: option.clone(),
                count: rows
                    .iter()
                    .find(|(i, _)| *i as usize == index)
                    .map_or(0, |(_, c)| *c),
            })
            .collect();
        let total = counts.iter().map(|c| c.count).sum();
        Self { counts, total }
    }

    pub fn empty(options: &[String]) -> Self {
        Self::from_rows(options, &[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollWithTally {
    pub poll: Poll,
    pub tally: Tally,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn options() -> Vec<String> {
        vec!["Coffee".to_string(), "Tea".to_string()]
    }

    #[test]
    fn test_tally_zero_fills_unvoted_options() {
        let tally = Tally::from_rows(&options(), &[(1, 3)]);
        assert_eq!(tally.counts[0].count, 0);
        assert_eq!(tally.counts[1].count, 3);
        assert_eq!(tally.total, 3);
    }

    #[test]
    fn test_tally_ignores_out_of_range_rows() {
        // A row for a dropped index must not panic or shift counts.
        let tally = Tally::from_rows(&options(), &[(0, 2), (7, 9)]);
        assert_eq!(tally.counts[0].count, 2);
        assert_eq!(tally.counts[1].count, 0);
        assert_eq!(tally.total, 2);
    }

    #[test]
    fn test_empty_tally() {
        let tally = Tally::empty(&options());
        assert_eq!(tally.total, 0);
        assert_eq!(tally.counts.len(), 2);
    }

    #[test]
    fn test_accepts_votes_at() {
        let mut poll = Poll::new("Q?".to_string(), options(), Utc::now() + Duration::hours(1));
        let now = Utc::now();
        assert!(poll.accepts_votes_at(now));
        assert!(!poll.accepts_votes_at(now + Duration::hours(2)));

        poll.status = PollStatus::Closed;
        assert!(!poll.accepts_votes_at(now));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(
            "open".parse::<PollStatus>().map(|s| s.as_str()),
            Ok("open")
        );
        assert_eq!(
            "closed".parse::<PollStatus>().map(|s| s.as_str()),
            Ok("closed")
        );
        assert!("banned".parse::<PollStatus>().is_err());
    }
}
