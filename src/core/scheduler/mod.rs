//! Restart-surviving refresh scheduler.
//!
//! The next-run timestamp per feed lives in storage, so a restart picks up
//! where the previous process left off. The scheduler itself only answers
//! "is it due": interval and backoff logic is the orchestrator's.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::refresh::{RefreshOptions, RefreshOrchestrator};
use crate::core::storage::repository::{Repository, StorageError};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the first pass, so storage finishes initializing.
    pub grace: Duration,
    pub tick: Duration,
}

#[derive(Clone)]
pub struct Scheduler {
    repository: Repository,
    orchestrator: RefreshOrchestrator,
    config: SchedulerConfig,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        repository: Repository,
        orchestrator: RefreshOrchestrator,
        config: SchedulerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            repository,
            orchestrator,
            config,
            stop_tx,
        }
    }

    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            info!(
                grace_secs = scheduler.config.grace.as_secs(),
                tick_secs = scheduler.config.tick.as_secs(),
                "scheduler started"
            );
            tokio::select! {
                _ = tokio::time::sleep(scheduler.config.grace) => {}
                _ = stop_rx.changed() => {}
            }
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                match scheduler.tick_once(Utc::now().timestamp()).await {
                    Ok(refreshed) if refreshed > 0 => {
                        debug!(refreshed, "scheduler tick refreshed due feeds")
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "scheduler tick failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(scheduler.config.tick) => {}
                    _ = stop_rx.changed() => {}
                }
            }
            info!("scheduler stopped");
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// One scheduling pass: refresh every feed whose persisted next-run
    /// timestamp has elapsed. The orchestrator records each feed's new
    /// next-run timestamp, success or failure.
    pub async fn tick_once(&self, now: i64) -> Result<usize, StorageError> {
        let due = self.repository.due_feeds(now).await?;
        let count = due.len();
        for feed in due {
            if let Err(error) = self
                .orchestrator
                .refresh_feed(feed.id, RefreshOptions::default())
                .await
            {
                warn!(feed_id = feed.id, %error, "scheduled refresh failed");
            }
        }
        Ok(count)
    }
}
