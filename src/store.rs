//! Shared key/value state and high-water-mark persistence.
//!
//! `SharedStore` is the seam for state that several bot instances may share
//! (rate-limit flag, lock, last processed mention). `MemoryStore` backs it in
//! process; any key/value service with an expiring lock can implement it.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Takes an exclusive lock that expires after `ttl`. Returns false if
    /// someone else holds an unexpired lock on `key`.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn unlock(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<DashMap<String, String>>,
    locks: Arc<DashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).map(|value| value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if *held.get() > now {
                    return Ok(false);
                }
                debug!(key, "Taking over expired lock");
                held.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str) -> Result<(), StoreError> {
        self.locks.remove(key);
        Ok(())
    }
}

/// Durable single value: id of the newest mention already handed to a batch.
#[async_trait]
pub trait HighWaterMarkStore: Send + Sync {
    async fn read(&self) -> Result<Option<String>, StoreError>;
    async fn write(&self, value: &str) -> Result<(), StoreError>;
}

pub struct FileHighWaterMark {
    path: PathBuf,
}

impl FileHighWaterMark {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HighWaterMarkStore for FileHighWaterMark {
    async fn read(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, value: &str) -> Result<(), StoreError> {
        tokio::fs::write(&self.path, value).await?;
        Ok(())
    }
}

pub const HIGH_WATER_MARK_KEY: &str = "followbot:last_mention_id";

pub struct SharedHighWaterMark {
    store: Arc<dyn SharedStore>,
}

impl SharedHighWaterMark {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HighWaterMarkStore for SharedHighWaterMark {
    async fn read(&self) -> Result<Option<String>, StoreError> {
        self.store.get(HIGH_WATER_MARK_KEY).await
    }

    async fn write(&self, value: &str) -> Result<(), StoreError> {
        self.store.set(HIGH_WATER_MARK_KEY, value.to_string()).await
    }
}
