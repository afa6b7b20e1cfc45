use crate::batch::BatchProcessor;
use crate::config::{load_config, AppSettings};
use crate::polling::PollingService;
use crate::rate_limit::{
    InMemoryRateLimitState, RateLimitCoordinator, RateLimitState, StoreRateLimitState,
};
use crate::relationship_cache::RelationshipCache;
use crate::resolver::RelationshipResolver;
use crate::store::{
    FileHighWaterMark, HighWaterMarkStore, MemoryStore, SharedHighWaterMark, SharedStore,
};
use crate::twitter::TwitterApiClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod batch;
mod config;
mod models;
mod polling;
mod query;
mod rate_limit;
mod relationship_cache;
mod resolver;
mod store;
mod twitter;

#[cfg(test)]
mod tests;

fn init_logging(settings: &AppSettings) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let app_settings = load_config().with_context(|| "Failed to load configuration")?;
    init_logging(&app_settings);

    info!("Starting application...");
    info!(
        log_level = %app_settings.log_level,
        dry_run = app_settings.dry_run,
        rate_limit_backend = %app_settings.rate_limit_backend,
        high_water_mark_backend = %app_settings.high_water_mark_backend,
        "Configuration loaded successfully."
    );

    let client = Arc::new(
        TwitterApiClient::new(&app_settings).with_context(|| "Failed to create API client")?,
    );
    info!("API client initialized successfully.");

    // in-process unless an external key/value store is wired in here
    let shared_store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());

    let rate_limit_state: Arc<dyn RateLimitState> =
        match app_settings.rate_limit_backend.as_str() {
            "shared" => Arc::new(StoreRateLimitState::new(shared_store.clone())),
            _ => Arc::new(InMemoryRateLimitState::new()),
        };
    let coordinator = Arc::new(RateLimitCoordinator::new(
        rate_limit_state,
        app_settings.rate_limit_grace(),
        app_settings.rate_limit_lock_ttl(),
    )
    .with_max_retries(app_settings.max_throttle_retries));

    let high_water_mark: Arc<dyn HighWaterMarkStore> =
        match app_settings.high_water_mark_backend.as_str() {
            "shared" => Arc::new(SharedHighWaterMark::new(shared_store.clone())),
            _ => Arc::new(FileHighWaterMark::new(&app_settings.high_water_mark_path)),
        };

    let cache = RelationshipCache::new(app_settings.cache_capacity);
    info!(capacity = cache.capacity(), "Relationship cache ready.");
    let resolver = Arc::new(RelationshipResolver::new(
        client.clone(),
        cache.clone(),
        coordinator.clone(),
    ));
    let batch = Arc::new(BatchProcessor::new(
        resolver,
        client.clone(),
        coordinator.clone(),
        high_water_mark.clone(),
        app_settings.bot_handle.clone(),
        app_settings.dry_run,
    ));

    let config_arc = Arc::new(app_settings);
    let polling_service = PollingService::new(
        client,
        coordinator,
        batch,
        cache,
        high_water_mark,
        config_arc.clone(),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    polling_service.start_polling(shutdown).await?;

    info!("Stopped.");
    Ok(())
}
