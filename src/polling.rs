use crate::api::MentionSource;
use crate::batch::BatchProcessor;
use crate::config::AppSettings;
use crate::models::{MentionOutcome, MentionTask};
use crate::rate_limit::RateLimitCoordinator;
use crate::relationship_cache::RelationshipCache;
use crate::store::HighWaterMarkStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct PollingService {
    mentions: Arc<dyn MentionSource>,
    coordinator: Arc<RateLimitCoordinator>,
    batch: Arc<BatchProcessor>,
    cache: RelationshipCache,
    high_water_mark: Arc<dyn HighWaterMarkStore>,
    config: Arc<AppSettings>,
}

impl PollingService {
    pub fn new(
        mentions: Arc<dyn MentionSource>,
        coordinator: Arc<RateLimitCoordinator>,
        batch: Arc<BatchProcessor>,
        cache: RelationshipCache,
        high_water_mark: Arc<dyn HighWaterMarkStore>,
        config: Arc<AppSettings>,
    ) -> Self {
        Self {
            mentions,
            coordinator,
            batch,
            cache,
            high_water_mark,
            config,
        }
    }

    /// Polls for mentions and purges the cache on their own cadences until
    /// `shutdown` is cancelled.
    pub async fn start_polling(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            cache_purge_interval_seconds = self.config.cache_purge_interval_seconds,
            "Starting polling service"
        );

        let mut poll_interval =
            time::interval(Duration::from_secs(self.config.poll_interval_seconds.max(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let purge_period = Duration::from_secs(self.config.cache_purge_interval_seconds.max(1));
        // first purge one full period after start
        let mut purge_interval = time::interval_at(time::Instant::now() + purge_period, purge_period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping polling service");
                    return Ok(());
                }
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_mentions().await {
                        error!("Error polling mentions: {:#}", e);
                    }
                }
                _ = purge_interval.tick() => {
                    self.purge_cache().await;
                }
            }
        }
    }

    pub async fn poll_mentions(&self) -> Result<Vec<MentionOutcome>> {
        let since_id = self
            .high_water_mark
            .read()
            .await
            .context("Failed to read high-water mark")?;
        info!(since_id = ?since_id, "Fetching mentions");

        let mut mentions = self
            .coordinator
            .call_with_retry(|| self.mentions.fetch_mentions(since_id.as_deref()))
            .await
            .context("Failed to fetch mentions")?;

        if mentions.is_empty() {
            debug!("No new mentions");
            return Ok(Vec::new());
        }

        // the timeline is newest first, batches run oldest first
        mentions.reverse();
        let items: Vec<MentionTask> = mentions.into_iter().map(MentionTask::from).collect();
        info!(count = items.len(), "Processing new mentions");

        let outcomes = self
            .batch
            .process_batch(items)
            .await
            .context("Failed to process mention batch")?;
        Ok(outcomes)
    }

    pub async fn purge_cache(&self) {
        let purged = self.cache.len().await;
        self.cache.purge_all().await;
        info!(purged, "Relationship cache purged");
    }
}
