//! Poll lifecycle: the open -> closed transition
//!
//! Two independent triggers resolve into the same idempotent close: a
//! one-shot timer armed when the poll is created, and a periodic sweep over
//! open polls whose expiry has passed. The sweep exists because in-process
//! timers do not survive a restart; the timer exists so most polls close the
//! moment they expire rather than a sweep interval later. Double invocation
//! is harmless: only the call that actually flips the status publishes the
//! closed event.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use livepoll_core::{
    models::{Poll, PollId},
    repository::PollRepository,
    Result,
};

use super::events::PollEvent;
use super::fanout::PublishRequest;

pub struct PollLifecycleManager {
    polls: Arc<PollRepository>,
    publish_tx: mpsc::Sender<PublishRequest>,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
}

impl PollLifecycleManager {
    #[must_use]
    pub fn new(
        polls: Arc<PollRepository>,
        publish_tx: mpsc::Sender<PublishRequest>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            polls,
            publish_tx,
            sweep_interval,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Shut down timers and the sweep
    pub fn shutdown(&self) {
        info!("Shutting down PollLifecycleManager");
        self.cancel_token.cancel();
    }

    /// Close a poll. Safe to call any number of times from any trigger:
    /// the repository's status guard ensures only one caller performs the
    /// transition, and only that caller publishes the closed event. Viewers
    /// stay in the room to see the final tally; the ledger rejects further
    /// votes from here on.
    pub async fn close_poll(&self, poll_id: &PollId) -> Result<bool> {
        let freshly_closed = self.polls.close(poll_id).await?;

        if freshly_closed {
            info!(poll_id = poll_id.as_str(), "Poll closed");

            let event = PollEvent::PollClosed {
                poll_id: poll_id.clone(),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.publish_tx.send(PublishRequest { event }).await {
                // A missed broadcast self-heals at the next join; the close
                // itself is already durable
                error!(
                    poll_id = poll_id.as_str(),
                    error = %e,
                    "Failed to publish poll_closed event"
                );
            }
        } else {
            debug!(poll_id = poll_id.as_str(), "Poll already closed, skipping");
        }

        Ok(freshly_closed)
    }

    /// Arm the one-shot close timer for a poll. Armed unconditionally at
    /// creation and never cancelled; if the sweep (or anything else) closes
    /// the poll first, the timer's close is a no-op.
    pub fn arm_close_timer(self: Arc<Self>, poll: &Poll) {
        let delay = (poll.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let cancel = self.cancel_token.clone();
        let manager = self;
        let poll_id = poll.id.clone();

        debug!(
            poll_id = poll_id.as_str(),
            delay_secs = delay.as_secs(),
            "Close timer armed"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = manager.close_poll(&poll_id).await {
                        error!(
                            poll_id = poll_id.as_str(),
                            error = %e,
                            "Timer-triggered close failed, sweep will retry"
                        );
                    }
                }
            }
        });
    }

    /// Start the periodic sweep over open polls past their expiry. Covers
    /// timers lost to a process restart.
    pub fn start_sweep(self: Arc<Self>) -> JoinHandle<()> {
        let manager = self;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.sweep_interval);

            loop {
                tokio::select! {
                    _ = manager.cancel_token.cancelled() => {
                        info!("Lifecycle sweep cancelled");
                        return;
                    }
                    _ = interval.tick() => {
                        manager.run_sweep_once().await;
                    }
                }
            }
        })
    }

    async fn run_sweep_once(&self) {
        match self.polls.list_expired_open(Utc::now()).await {
            Ok(expired) => {
                if !expired.is_empty() {
                    info!(count = expired.len(), "Sweep found expired open polls");
                }
                for poll_id in expired {
                    if let Err(e) = self.close_poll(&poll_id).await {
                        error!(
                            poll_id = poll_id.as_str(),
                            error = %e,
                            "Sweep-triggered close failed"
                        );
                    }
                }
            }
            Err(e) => {
                // Next tick retries; an unreachable store must not kill the loop
                error!(error = %e, "Sweep query failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_double_close_publishes_once() {
        // First close flips the status and publishes; second returns false
        // and publishes nothing
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_sweep_closes_expired_poll_without_timer() {
        // Insert an already-expired open poll, run one sweep, status is closed
    }
}
