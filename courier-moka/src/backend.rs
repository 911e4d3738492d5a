//! Moka backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use courier_backend::{Backend, BackendResult, DeleteStatus};
use courier_core::{BackendLabel, CacheKey, CacheType, CacheValue, Raw};
use moka::future::Cache;

/// What moka actually holds: the value plus how long to retain it.
#[derive(Clone, Debug)]
pub(crate) struct Stored {
    pub(crate) value: CacheValue<Raw>,
    pub(crate) retain: Option<Duration>,
}

/// In-memory cache store powered by Moka.
///
/// Implements the `Memory` tier. Entries are evicted once the TTL hint
/// passed to [`Backend::write`] elapses or when capacity is exceeded.
///
/// ```
/// use courier_moka::MokaBackend;
///
/// let backend = MokaBackend::builder().max_entries(10_000).build();
/// ```
///
/// # Caveats
///
/// - Data is **not persisted** and is lost on process restart
/// - Data is **not shared** across processes
/// - Expiration is **best-effort**: an expired entry may briefly remain
///   readable until Moka's maintenance runs; readers check freshness anyway
#[derive(Clone)]
pub struct MokaBackend {
    pub(crate) cache: Cache<CacheKey, Stored>,
    pub(crate) label: BackendLabel,
}

impl std::fmt::Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl MokaBackend {
    /// Starts configuring a store.
    pub fn builder() -> crate::builder::MokaBackendBuilder {
        crate::builder::MokaBackendBuilder::default()
    }

    /// Runs pending maintenance (evictions, expirations) synchronously.
    ///
    /// Mostly useful in tests that assert on capacity behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl Backend for MokaBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.cache.get(key).await.map(|stored| stored.value))
    }

    async fn write(
        &self,
        key: &CacheKey,
        value: CacheValue<Raw>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        self.cache
            .insert(key.clone(), Stored { value, retain: ttl })
            .await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        match self.cache.remove(key).await {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn tier(&self) -> CacheType {
        CacheType::Memory
    }

    fn label(&self) -> BackendLabel {
        self.label.clone()
    }
}
