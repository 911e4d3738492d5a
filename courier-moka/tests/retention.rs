//! Tests for retention hints and capacity limits.

use std::time::Duration;

use bytes::Bytes;
use courier_backend::{Backend, CacheBackend};
use courier_core::{CacheKey, CacheType, CacheValue};
use courier_moka::MokaBackend;

fn make_key(id: u32) -> CacheKey {
    CacheKey::from_raw(format!("GET http://upstream/items/{id}"))
}

fn make_value(size: usize) -> CacheValue<Bytes> {
    CacheValue::new(Bytes::from(vec![0u8; size]), 60)
}

#[tokio::test]
async fn entry_is_dropped_after_retention_hint() {
    let backend = MokaBackend::builder().max_entries(100).build();
    let key = make_key(1);

    backend
        .write(&key, make_value(10), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(backend.read(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(backend.read(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn rewrite_restarts_retention() {
    let backend = MokaBackend::builder().max_entries(100).build();
    let key = make_key(2);

    backend
        .write(&key, make_value(10), Some(Duration::from_millis(150)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend
        .write(&key, make_value(10), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(backend.read(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn entry_capacity_is_enforced() {
    let backend = MokaBackend::builder().max_entries(3).build();

    for id in 0..10 {
        backend.write(&make_key(id), make_value(1), None).await.unwrap();
    }
    backend.run_pending_tasks().await;

    assert!(backend.entry_count() <= 3);
}

#[tokio::test]
async fn typed_values_keep_store_metadata() {
    let backend = MokaBackend::builder().label("l1").max_bytes(1024 * 1024).build();
    let key = make_key(3);
    let value = CacheValue::new(vec!["a".to_owned(), "b".to_owned()], 30);

    backend.set(&key, &value, None).await.unwrap();
    let read: CacheValue<Vec<String>> = backend.get(&key).await.unwrap().unwrap();

    assert_eq!(read, value);
    assert_eq!(backend.tier(), CacheType::Memory);
    assert_eq!(backend.label().as_str(), "l1");
}
