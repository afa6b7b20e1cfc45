use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default number of verdicts kept before the least recently used one is evicted.
pub const DEFAULT_CAPACITY: usize = 2000;

/// Ordered (subject, target) pair. `(a, b)` and `(b, a)` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipKey {
    pub subject: String,
    pub target: String,
}

impl RelationshipKey {
    pub fn new(subject: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            target: target.into(),
        }
    }
}

/// Bounded memo of "does subject follow target" verdicts, shared by every
/// resolver task. Reads and writes both refresh recency.
#[derive(Clone)]
pub struct RelationshipCache {
    entries: Arc<Mutex<LruCache<RelationshipKey, bool>>>,
    capacity: NonZeroUsize,
}

impl RelationshipCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        RelationshipCache {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            capacity,
        }
    }

    pub async fn get(&self, key: &RelationshipKey) -> Option<bool> {
        let mut entries = self.entries.lock().await;
        entries.get(key).copied()
    }

    pub async fn put(&self, key: RelationshipKey, verdict: bool) {
        let mut entries = self.entries.lock().await;
        entries.put(key, verdict);
    }

    /// Drops every entry. Only the purge schedule calls this.
    pub async fn purge_all(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for RelationshipCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
