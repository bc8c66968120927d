//! Service construction and dependency injection

use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::{
    repository::{PollRepository, VoteRepository},
    service::{CommentLog, PollService, RateLimiter, TokenService, VoteLedger},
    Config,
};

/// Container for the core services shared by every surface
#[derive(Clone)]
pub struct CoreServices {
    pub poll_service: Arc<PollService>,
    pub vote_ledger: Arc<VoteLedger>,
    pub comment_log: Arc<CommentLog>,
    pub poll_repository: Arc<PollRepository>,
    pub token_service: TokenService,
    pub vote_rate_limiter: RateLimiter,
}

/// Wire repositories and services against the shared pool
pub fn init_services(pool: PgPool, config: &Config) -> CoreServices {
    let poll_repository = Arc::new(PollRepository::new(pool.clone()));
    let vote_repository = Arc::new(VoteRepository::new(pool.clone()));

    let poll_service = Arc::new(PollService::new(
        poll_repository.clone(),
        vote_repository.clone(),
    ));
    let vote_ledger = Arc::new(VoteLedger::new(pool, poll_repository.clone(), vote_repository));
    let comment_log = Arc::new(CommentLog::new());
    let token_service = TokenService::new(&config.jwt.secret, config.jwt.token_duration_hours);
    let vote_rate_limiter = RateLimiter::new(
        config.rate_limit.votes_per_second,
        config.rate_limit.vote_burst,
    );

    info!("Core services initialized");

    CoreServices {
        poll_service,
        vote_ledger,
        comment_log,
        poll_repository,
        token_service,
        vote_rate_limiter,
    }
}
