use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{BackendLabel, CacheKey, CacheType, CacheValue, Raw};
use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use crate::{BackendError, DeleteStatus};

pub type BackendResult<T> = Result<T, BackendError>;

/// Raw cache store.
///
/// `ttl` passed to [`write`](Backend::write) is a retention hint: the store
/// may evict the entry once it elapses. Freshness is decided by the reader
/// from the value's own metadata.
#[async_trait]
pub trait Backend: Sync + Send {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>>;

    async fn write(
        &self,
        key: &CacheKey,
        value: CacheValue<Raw>,
        ttl: Option<Duration>,
    ) -> BackendResult<()>;

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Storage tier implemented by this store.
    fn tier(&self) -> CacheType;

    /// Name of this store in logs and metrics.
    fn label(&self) -> BackendLabel {
        BackendLabel::for_tier(self.tier())
    }
}

/// Typed operations on top of [`Backend`].
///
/// Values are encoded as JSON. Implemented for every backend.
pub trait CacheBackend: Backend {
    fn get<T>(
        &self,
        key: &CacheKey,
    ) -> impl Future<Output = BackendResult<Option<CacheValue<T>>>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            match self.read(key).await? {
                Some(value) => {
                    let (meta, raw) = value.into_parts();
                    let data: T = serde_json::from_slice(&raw)?;
                    trace!(backend = %self.label(), %key, bytes = raw.len(), "cache read");
                    Ok(Some(CacheValue::from_parts(meta, data)))
                }
                None => Ok(None),
            }
        }
    }

    fn set<T>(
        &self,
        key: &CacheKey,
        value: &CacheValue<T>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = BackendResult<()>> + Send
    where
        T: Serialize + Sync,
    {
        async move {
            let serialized = serde_json::to_vec(value.data())?;
            let bytes_written = serialized.len();
            let raw = CacheValue::with_stored_at(
                Bytes::from(serialized),
                value.stored_at(),
                value.ttl_seconds(),
            );
            self.write(key, raw, ttl).await?;
            trace!(backend = %self.label(), %key, bytes = bytes_written, "cache write");
            Ok(())
        }
    }

    fn delete(&self, key: &CacheKey) -> impl Future<Output = BackendResult<DeleteStatus>> + Send {
        async move { self.remove(key).await }
    }
}

impl<B: Backend + ?Sized> CacheBackend for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use serde::Deserialize;

    #[derive(Default)]
    struct MapBackend {
        store: DashMap<CacheKey, CacheValue<Raw>>,
    }

    #[async_trait]
    impl Backend for MapBackend {
        async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
            Ok(self.store.get(key).map(|v| v.clone()))
        }

        async fn write(
            &self,
            key: &CacheKey,
            value: CacheValue<Raw>,
            _ttl: Option<Duration>,
        ) -> BackendResult<()> {
            self.store.insert(key.clone(), value);
            Ok(())
        }

        async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
            Ok(match self.store.remove(key) {
                Some(_) => DeleteStatus::Deleted(1),
                None => DeleteStatus::Missing,
            })
        }

        fn tier(&self) -> CacheType {
            CacheType::Memory
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn typed_roundtrip_keeps_metadata() {
        let backend = MapBackend::default();
        let key = CacheKey::from_raw("payload");
        let value = CacheValue::new(
            Payload {
                id: 7,
                name: "seven".into(),
            },
            42,
        );

        backend.set(&key, &value, None).await.unwrap();
        let read: CacheValue<Payload> = backend.get(&key).await.unwrap().unwrap();

        assert_eq!(read, value);
    }

    #[tokio::test]
    async fn corrupted_bytes_surface_as_format_error() {
        let backend = MapBackend::default();
        let key = CacheKey::from_raw("broken");
        backend
            .write(&key, CacheValue::new(Bytes::from_static(b"{not json"), 1), None)
            .await
            .unwrap();

        let result = backend.get::<Payload>(&key).await;
        assert!(matches!(result, Err(BackendError::Format(_))));
    }

    #[tokio::test]
    async fn delete_reports_missing() {
        let backend = MapBackend::default();
        let key = CacheKey::from_raw("absent");
        assert_eq!(backend.delete(&key).await.unwrap(), DeleteStatus::Missing);
    }
}
