//! Server lifecycle management
//!
//! Builds the HTTP router over the shared services and runs it until a
//! shutdown signal, then stops the background sync tasks.

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use livepoll_api::{create_router, AppState};
use livepoll_cluster::{
    FanoutBus, PollLifecycleManager, PresenceTracker, PublishRequest, RoomMessageHub,
};
use livepoll_core::{bootstrap::CoreServices, Config};

pub struct LivePollServer {
    config: Config,
    services: CoreServices,
    message_hub: Arc<RoomMessageHub>,
    presence: Arc<PresenceTracker>,
    publish_tx: mpsc::Sender<PublishRequest>,
    lifecycle: Arc<PollLifecycleManager>,
    fanout: Arc<FanoutBus>,
}

impl LivePollServer {
    #[must_use]
    pub const fn new(
        config: Config,
        services: CoreServices,
        message_hub: Arc<RoomMessageHub>,
        presence: Arc<PresenceTracker>,
        publish_tx: mpsc::Sender<PublishRequest>,
        lifecycle: Arc<PollLifecycleManager>,
        fanout: Arc<FanoutBus>,
    ) -> Self {
        Self {
            config,
            services,
            message_hub,
            presence,
            publish_tx,
            lifecycle,
            fanout,
        }
    }

    /// Start the HTTP server and wait for shutdown signal
    pub async fn start(self) -> Result<()> {
        let state = AppState {
            poll_service: self.services.poll_service.clone(),
            vote_ledger: self.services.vote_ledger.clone(),
            comment_log: self.services.comment_log.clone(),
            token_service: self.services.token_service.clone(),
            vote_rate_limiter: self.services.vote_rate_limiter.clone(),
            presence: self.presence.clone(),
            message_hub: self.message_hub.clone(),
            publish_tx: self.publish_tx.clone(),
            lifecycle: self.lifecycle.clone(),
        };

        let router = create_router(state);

        let addr = self.config.http_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP server listening on {addr}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, shutting down background tasks");
        self.lifecycle.shutdown();
        self.fanout.shutdown();

        Ok(())
    }
}

/// Resolves when the process receives Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
