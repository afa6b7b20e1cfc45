//! Fans a batch of mentions out to concurrent resolver tasks and collects
//! exactly one outcome per mention.

use futures::future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::api::ReplySink;
use crate::models::{MentionOutcome, MentionTask, OutcomeStatus};
use crate::query::parse_query;
use crate::rate_limit::RateLimitCoordinator;
use crate::resolver::RelationshipResolver;
use crate::store::{HighWaterMarkStore, StoreError};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to persist high-water mark: {0}")]
    Persistence(#[from] StoreError),
}

pub struct BatchProcessor {
    resolver: Arc<RelationshipResolver>,
    replies: Arc<dyn ReplySink>,
    coordinator: Arc<RateLimitCoordinator>,
    high_water_mark: Arc<dyn HighWaterMarkStore>,
    bot_handle: String,
    dry_run: bool,
}

impl BatchProcessor {
    pub fn new(
        resolver: Arc<RelationshipResolver>,
        replies: Arc<dyn ReplySink>,
        coordinator: Arc<RateLimitCoordinator>,
        high_water_mark: Arc<dyn HighWaterMarkStore>,
        bot_handle: String,
        dry_run: bool,
    ) -> Self {
        Self {
            resolver,
            replies,
            coordinator,
            high_water_mark,
            bot_handle,
            dry_run,
        }
    }

    /// Processes `items` (oldest first) and returns one outcome per item, in
    /// the same order. The newest id is persisted before anything is dispatched.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn process_batch(
        &self,
        items: Vec<MentionTask>,
    ) -> Result<Vec<MentionOutcome>, BatchError> {
        let Some(newest) = items.last() else {
            return Ok(Vec::new());
        };
        self.high_water_mark.write(&newest.id).await?;
        info!(newest_id = %newest.id, "High-water mark persisted, dispatching batch");

        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let resolver = self.resolver.clone();
                let replies = self.replies.clone();
                let coordinator = self.coordinator.clone();
                let bot_handle = self.bot_handle.clone();
                let dry_run = self.dry_run;
                tokio::spawn(async move {
                    let outcome = run_task(&resolver, &bot_handle, item).await;
                    report(replies.as_ref(), &coordinator, &outcome, dry_run).await;
                    outcome
                })
            })
            .collect();

        let mut slots: Vec<Option<MentionOutcome>> = vec![None; ids.len()];
        for (index, joined) in future::join_all(handles).await.into_iter().enumerate() {
            slots[index] = Some(match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(mention_id = %ids[index], error = %e, "Mention task did not complete");
                    MentionOutcome {
                        id: ids[index].clone(),
                        status: OutcomeStatus::Failed(
                            "Something went wrong while checking, please try again later"
                                .to_string(),
                        ),
                    }
                }
            });
        }

        let outcomes: Vec<MentionOutcome> = slots.into_iter().flatten().collect();
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            total = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            "Batch complete"
        );
        Ok(outcomes)
    }
}

async fn run_task(
    resolver: &RelationshipResolver,
    bot_handle: &str,
    item: MentionTask,
) -> MentionOutcome {
    let status = match parse_query(&item.text, bot_handle) {
        Err(e) => {
            info!(mention_id = %item.id, error = %e, "Mention is not a follow query");
            OutcomeStatus::Failed(e.to_string())
        }
        Ok(query) => match resolver.resolve(&query).await {
            Ok(response) => OutcomeStatus::Succeeded(response),
            Err(e) => {
                warn!(mention_id = %item.id, error = %e, "Failed to resolve query");
                OutcomeStatus::Failed(e.to_string())
            }
        },
    };
    MentionOutcome {
        id: item.id,
        status,
    }
}

async fn report(
    replies: &dyn ReplySink,
    coordinator: &RateLimitCoordinator,
    outcome: &MentionOutcome,
    dry_run: bool,
) {
    if dry_run {
        info!(
            mention_id = %outcome.id,
            success = outcome.is_success(),
            reply = %outcome.message(),
            "Dry run, not posting reply"
        );
        return;
    }
    let posted = coordinator
        .call_with_retry(|| replies.post_reply(&outcome.id, outcome.message()))
        .await;
    if let Err(e) = posted {
        error!(mention_id = %outcome.id, error = %e, "Failed to post reply");
    }
}
