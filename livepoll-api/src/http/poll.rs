//! Poll API endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::http::{auth::require_voter, AppResult, AppState};
use livepoll_cluster::{PollEvent, PublishRequest};
use livepoll_core::models::{
    CastVoteRequest, CreatePollRequest, OptionCount, PollId, PollStatus, PollWithTally, Tally,
};

/// Poll with its tally as served to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub results: Vec<OptionCount>,
    pub total_votes: i64,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<PollWithTally> for PollResponse {
    fn from(value: PollWithTally) -> Self {
        let PollWithTally { poll, tally } = value;
        Self {
            id: poll.id.as_str().to_string(),
            question: poll.question,
            options: poll.options,
            results: tally.counts,
            total_votes: tally.total,
            status: poll.status,
            created_at: poll.created_at,
            expires_at: poll.expires_at,
        }
    }
}

/// Cast vote response
#[derive(Debug, Serialize, Deserialize)]
pub struct CastVoteResponse {
    pub success: bool,
    pub results: Vec<OptionCount>,
    pub total_votes: i64,
}

/// POST /api/poll
pub async fn create_poll(
    State(state): State<AppState>,
    Json(request): Json<CreatePollRequest>,
) -> AppResult<(StatusCode, Json<PollResponse>)> {
    let poll = state.poll_service.create_poll(request).await?;

    // One-shot close timer; the sweep covers us if this process dies first
    state.lifecycle.clone().arm_close_timer(&poll);

    let tally = Tally::empty(&poll.options);
    let response = PollResponse::from(PollWithTally { poll, tally });

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/poll/{id}
pub async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PollResponse>> {
    let poll_id = PollId::from_string(id);
    let poll = state.poll_service.get_poll(&poll_id).await?;
    Ok(Json(poll.into()))
}

/// POST /api/poll/{id}/vote
///
/// Requires authentication; rate-limited per voter. On success the updated
/// tally goes to the caller in the response and to every viewer through the
/// fan-out bus.
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CastVoteRequest>,
) -> AppResult<Json<CastVoteResponse>> {
    let claims = require_voter(&state, &headers)?;
    state.vote_rate_limiter.check(&claims.sub)?;

    let poll_id = PollId::from_string(id);
    let voter_id = claims.voter_id();

    let tally = state
        .vote_ledger
        .cast_vote(&poll_id, &voter_id, body.option_index)
        .await?;

    // The vote is durable at this point; a lost broadcast self-heals on the
    // next vote or re-join, so it must not fail the request
    let event = PollEvent::VoteUpdated {
        poll_id: poll_id.clone(),
        tally: tally.clone(),
        timestamp: Utc::now(),
    };
    if let Err(e) = state.publish_tx.send(PublishRequest { event }).await {
        warn!(
            poll_id = poll_id.as_str(),
            error = %e,
            "Failed to publish vote update"
        );
    }

    info!(
        poll_id = poll_id.as_str(),
        voter_id = voter_id.as_str(),
        option_index = body.option_index,
        "Vote accepted"
    );

    Ok(Json(CastVoteResponse {
        success: true,
        results: tally.counts,
        total_votes: tally.total,
    }))
}

/// GET /api/live-polls
pub async fn list_live_polls(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<PollResponse>>> {
    let polls = state.poll_service.list_open(10).await?;
    Ok(Json(polls.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepoll_core::models::Poll;

    #[test]
    fn test_poll_response_shape() {
        let options = vec!["Coffee".to_string(), "Tea".to_string()];
        let poll = Poll::new(
            "Coffee or tea?".to_string(),
            options.clone(),
            Utc::now() + chrono::Duration::hours(1),
        );
        let tally = Tally::from_rows(&options, &[(1, 2)]);

        let response = PollResponse::from(PollWithTally { poll, tally });
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["question"], "Coffee or tea?");
        assert_eq!(json["status"], "open");
        assert_eq!(json["total_votes"], 2);
        assert_eq!(json["results"][0]["count"], 0);
        assert_eq!(json["results"][1]["option"], "Tea");
    }
}
