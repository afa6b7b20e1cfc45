//! Coordination of remote throttling across concurrent tasks.
//!
//! When any task is throttled it marks the shared state limited until the
//! reset time and sleeps until then. Afterwards it tries to take a short lock
//! and clear the flag. Lock contention is ignored: several tasks may each sleep
//! the full window and more than one may clear the flag. Tasks that start
//! while the flag is set wait in grace-window steps until it clears.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::store::{SharedStore, StoreError};

pub const LIMITED_KEY: &str = "followbot:rate_limited";
pub const RESET_AT_KEY: &str = "followbot:rate_limit_reset_at";
pub const CLEAR_LOCK_KEY: &str = "followbot:rate_limit_clear_lock";

pub const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitSnapshot {
    pub limited: bool,
    pub reset_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RateLimitState: Send + Sync {
    async fn snapshot(&self) -> Result<RateLimitSnapshot, StoreError>;
    async fn mark_limited(&self, reset_at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError>;
    async fn unlock(&self) -> Result<(), StoreError>;
}

/// Single-process state guarded by a mutex.
#[derive(Default)]
pub struct InMemoryRateLimitState {
    inner: Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    snapshot: RateLimitSnapshot,
    lock_expires: Option<tokio::time::Instant>,
}

impl InMemoryRateLimitState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitState for InMemoryRateLimitState {
    async fn snapshot(&self) -> Result<RateLimitSnapshot, StoreError> {
        Ok(self.inner.lock().await.snapshot)
    }

    async fn mark_limited(&self, reset_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // keep the latest reset time when several tasks report at once
        let reset_at = match inner.snapshot.reset_at {
            Some(current) if inner.snapshot.limited && current > reset_at => current,
            _ => reset_at,
        };
        inner.snapshot = RateLimitSnapshot {
            limited: true,
            reset_at: Some(reset_at),
        };
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.lock().await.snapshot.limited = false;
        Ok(())
    }

    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = tokio::time::Instant::now();
        if matches!(inner.lock_expires, Some(expires) if expires > now) {
            return Ok(false);
        }
        inner.lock_expires = Some(now + ttl);
        Ok(true)
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        self.inner.lock().await.lock_expires = None;
        Ok(())
    }
}

/// State kept in a [`SharedStore`] so several bot instances see the same flag.
pub struct StoreRateLimitState {
    store: Arc<dyn SharedStore>,
}

impl StoreRateLimitState {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RateLimitState for StoreRateLimitState {
    async fn snapshot(&self) -> Result<RateLimitSnapshot, StoreError> {
        let limited = self.store.get(LIMITED_KEY).await?.as_deref() == Some("true");
        let reset_at = match self.store.get(RESET_AT_KEY).await? {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| StoreError::Backend(format!("bad reset time '{}': {}", raw, e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(RateLimitSnapshot { limited, reset_at })
    }

    async fn mark_limited(&self, reset_at: DateTime<Utc>) -> Result<(), StoreError> {
        // an unreadable previous value is overwritten
        let current = self.snapshot().await.ok();
        let reset_at = match current {
            Some(RateLimitSnapshot {
                limited: true,
                reset_at: Some(current),
            }) if current > reset_at => current,
            _ => reset_at,
        };
        self.store.set(RESET_AT_KEY, reset_at.to_rfc3339()).await?;
        self.store.set(LIMITED_KEY, "true".to_string()).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(LIMITED_KEY).await
    }

    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store.try_lock(CLEAR_LOCK_KEY, ttl).await
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        self.store.unlock(CLEAR_LOCK_KEY).await
    }
}

pub struct RateLimitCoordinator {
    state: Arc<dyn RateLimitState>,
    grace: Duration,
    lock_ttl: Duration,
    max_retries: u32,
}

impl RateLimitCoordinator {
    pub fn new(state: Arc<dyn RateLimitState>, grace: Duration, lock_ttl: Duration) -> Self {
        Self {
            state,
            grace,
            lock_ttl,
            max_retries: DEFAULT_MAX_THROTTLE_RETRIES,
        }
    }

    /// Caps how many times [`Self::call_with_retry`] retries a throttled call.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Runs `call` once the flag is clear, backing off and retrying it
    /// whenever the API throttles. The last error is returned once the
    /// retries are used up.
    pub async fn call_with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut retries = 0;
        loop {
            self.await_clearance().await;
            match call().await {
                Err(ApiError::Throttled { reset_at }) if retries < self.max_retries => {
                    retries += 1;
                    self.report_throttled(reset_at).await;
                    debug!(retries, "Retrying throttled call");
                }
                result => return result,
            }
        }
    }

    /// Waits while another task's backoff window is active.
    pub async fn await_clearance(&self) {
        loop {
            let snapshot = match self.state.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "Could not read rate-limit state, proceeding");
                    return;
                }
            };
            if !snapshot.limited {
                return;
            }
            if let Some(reset_at) = snapshot.reset_at {
                let grace = chrono::Duration::from_std(self.grace)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let stale_after = reset_at + grace;
                if Utc::now() > stale_after {
                    debug!(%reset_at, "Rate-limit flag outlived its window, proceeding");
                    return;
                }
            }
            debug!(grace_ms = self.grace.as_millis() as u64, "Rate limit active, waiting");
            tokio::time::sleep(self.grace).await;
        }
    }

    /// Records a throttling response and sleeps until `reset_at`.
    pub async fn report_throttled(&self, reset_at: DateTime<Utc>) {
        if let Err(e) = self.state.mark_limited(reset_at).await {
            warn!(error = %e, "Could not record rate-limit state");
        }

        let sleep_for = sleep_duration_until(reset_at, Utc::now());
        warn!(
            %reset_at,
            sleep_ms = sleep_for.as_millis() as u64,
            "Rate limited by remote API, backing off"
        );
        tokio::time::sleep(sleep_for).await;

        match self.state.try_lock(self.lock_ttl).await {
            Ok(true) => {
                if let Err(e) = self.state.clear().await {
                    warn!(error = %e, "Could not clear rate-limit flag");
                } else {
                    info!("Rate-limit window over, flag cleared");
                }
                if let Err(e) = self.state.unlock().await {
                    warn!(error = %e, "Could not release rate-limit lock");
                }
            }
            Ok(false) => debug!("Another task is clearing the rate-limit flag"),
            Err(e) => warn!(error = %e, "Could not take rate-limit lock, continuing"),
        }
    }
}

/// `reset_at - now`, clamped to zero.
pub fn sleep_duration_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (reset_at - now).to_std().unwrap_or(Duration::ZERO)
}
