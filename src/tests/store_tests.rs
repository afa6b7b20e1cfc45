use crate::store::{
    FileHighWaterMark, HighWaterMarkStore, MemoryStore, SharedHighWaterMark, SharedStore,
    HIGH_WATER_MARK_KEY,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_memory_store_set_get_delete() {
    let store = MemoryStore::new();
    assert_eq!(store.get("k").await.unwrap(), None);

    store.set("k", "v".to_string()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_store_lock_is_exclusive_until_unlocked() {
    let store = MemoryStore::new();
    assert!(store.try_lock("lock", Duration::from_secs(5)).await.unwrap());
    assert!(!store.try_lock("lock", Duration::from_secs(5)).await.unwrap());
    // other keys are independent
    assert!(store.try_lock("other", Duration::from_secs(5)).await.unwrap());

    store.unlock("lock").await.unwrap();
    assert!(store.try_lock("lock", Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn test_memory_store_lock_expires() {
    let store = MemoryStore::new();
    assert!(store.try_lock("lock", Duration::from_millis(30)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(store.try_lock("lock", Duration::from_millis(30)).await.unwrap());
}

#[tokio::test]
async fn test_memory_store_clones_share_state() {
    let store = MemoryStore::new();
    let other = store.clone();
    store.set("k", "v".to_string()).await.unwrap();
    assert_eq!(other.get("k").await.unwrap(), Some("v".to_string()));
}

#[tokio::test]
async fn test_file_high_water_mark_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("last_mention_id");
    let mark = FileHighWaterMark::new(&path);

    assert_eq!(mark.read().await.unwrap(), None);

    mark.write("1400000000000000001").await.unwrap();
    assert_eq!(
        mark.read().await.unwrap(),
        Some("1400000000000000001".to_string())
    );

    mark.write("1400000000000000002").await.unwrap();
    assert_eq!(
        mark.read().await.unwrap(),
        Some("1400000000000000002".to_string())
    );
}

#[tokio::test]
async fn test_file_high_water_mark_ignores_whitespace_and_empty_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mark");

    std::fs::write(&path, "  \n").unwrap();
    assert_eq!(FileHighWaterMark::new(&path).read().await.unwrap(), None);

    std::fs::write(&path, "42\n").unwrap();
    assert_eq!(
        FileHighWaterMark::new(&path).read().await.unwrap(),
        Some("42".to_string())
    );
}

#[tokio::test]
async fn test_file_high_water_mark_write_fails_in_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mark = FileHighWaterMark::new(dir.path().join("missing").join("mark"));
    assert!(mark.write("1").await.is_err());
}

#[tokio::test]
async fn test_shared_high_water_mark_uses_store() {
    let store = Arc::new(MemoryStore::new());
    let mark = SharedHighWaterMark::new(store.clone());

    assert_eq!(mark.read().await.unwrap(), None);
    mark.write("99").await.unwrap();
    assert_eq!(
        store.get(HIGH_WATER_MARK_KEY).await.unwrap(),
        Some("99".to_string())
    );
    assert_eq!(mark.read().await.unwrap(), Some("99".to_string()));
}
