mod server;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use livepoll_cluster::{FanoutBus, PollLifecycleManager, PresenceTracker, RoomMessageHub};
use livepoll_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};

use server::LivePollServer;

/// Generate a unique node ID for this server instance, used to keep the
/// fan-out bus from echoing a replica's own events back at it
fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let suffix = nanoid::nanoid!(6);

    format!("{hostname}-{suffix}")
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (fails fast on validation errors)
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("LivePoll server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database
    let pool = init_database(&config).await?;

    // 4. Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            anyhow::anyhow!("Migration failed: {e}")
        })?;
    info!("Migrations completed");

    // 5. Initialize core services
    let services = init_services(pool, &config);

    // 6. Initialize the room hub and fan-out bus
    let message_hub = Arc::new(RoomMessageHub::new());
    let node_id = generate_node_id();
    info!(node_id = %node_id, "RoomMessageHub initialized");

    let fanout = Arc::new(FanoutBus::new(
        &config.redis.url,
        message_hub.clone(),
        node_id,
    )?);
    let publish_tx = fanout.clone().start();

    // 7. Lifecycle manager: close timers plus the sweep that covers timers
    //    lost to a restart. Polls found already expired close on the first
    //    sweep tick.
    let lifecycle = Arc::new(PollLifecycleManager::new(
        services.poll_repository.clone(),
        publish_tx.clone(),
        Duration::from_secs(config.lifecycle.sweep_interval_seconds),
    ));
    let _sweep = lifecycle.clone().start_sweep();
    info!(
        sweep_interval_seconds = config.lifecycle.sweep_interval_seconds,
        "Poll lifecycle sweep started"
    );

    // 8. Presence tracker (per-replica viewer counts)
    let presence = Arc::new(PresenceTracker::new());

    // 9. Start the HTTP/WebSocket server
    let server = LivePollServer::new(
        config,
        services,
        message_hub,
        presence,
        publish_tx,
        lifecycle,
        fanout,
    );

    server.start().await
}
