// Module: http
// HTTP/JSON REST API plus the WebSocket event surface

pub mod auth;
pub mod error;
pub mod health;
pub mod poll;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use livepoll_cluster::{PollLifecycleManager, PresenceTracker, PublishRequest, RoomMessageHub};
use livepoll_core::service::{CommentLog, PollService, RateLimiter, TokenService, VoteLedger};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub poll_service: Arc<PollService>,
    pub vote_ledger: Arc<VoteLedger>,
    pub comment_log: Arc<CommentLog>,
    pub token_service: TokenService,
    pub vote_rate_limiter: RateLimiter,
    pub presence: Arc<PresenceTracker>,
    pub message_hub: Arc<RoomMessageHub>,
    pub publish_tx: mpsc::Sender<PublishRequest>,
    pub lifecycle: Arc<PollLifecycleManager>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint (for monitoring probes)
        .merge(health::create_health_router())
        // Anonymous identity
        .route("/api/auth/anon", post(auth::anon_auth))
        // Poll routes
        .route("/api/poll", post(poll::create_poll))
        .route("/api/poll/{id}", get(poll::get_poll))
        .route("/api/poll/{id}/vote", post(poll::cast_vote))
        .route("/api/live-polls", get(poll::list_live_polls))
        // Realtime event surface
        .route("/api/ws", get(websocket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
