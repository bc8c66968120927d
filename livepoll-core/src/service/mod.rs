pub mod auth;
pub mod comment;
pub mod ledger;
pub mod poll;
pub mod rate_limit;

pub use auth::{Claims, TokenService};
pub use comment::CommentLog;
pub use ledger::VoteLedger;
pub use poll::PollService;
pub use rate_limit::RateLimiter;
