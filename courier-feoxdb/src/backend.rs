use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bincode::{
    config::standard as bincode_config,
    serde::{decode_from_slice, encode_to_vec},
};
use courier_backend::{Backend, BackendError, BackendResult, DeleteStatus};
use courier_core::{BackendLabel, CacheKey, CacheType, CacheValue, Raw};
use feoxdb::{FeoxError, FeoxStore};

use crate::FeOxDbError;

/// Disk cache store using FeOxDB.
///
/// Implements the `Disk` tier. Use it when cached responses must survive
/// restarts or do not fit in memory.
///
/// ```no_run
/// use courier_feoxdb::FeOxDbBackend;
///
/// let backend = FeOxDbBackend::builder()
///     .path("/var/cache/courier")
///     .max_file_size(1024 * 1024 * 1024)
///     .build()?;
/// # Ok::<(), courier_feoxdb::FeOxDbError>(())
/// ```
///
/// Cloning is cheap: clones share the same underlying database.
#[derive(Clone)]
pub struct FeOxDbBackend {
    store: Arc<FeoxStore>,
    label: BackendLabel,
}

impl FeOxDbBackend {
    /// Starts building a new backend.
    pub fn builder() -> FeOxDbBackendBuilder {
        FeOxDbBackendBuilder::default()
    }

    /// Memory-only database, for tests. Data is lost when dropped.
    pub fn in_memory() -> Result<Self, FeOxDbError> {
        Self::builder().build()
    }

    /// Forces pending writes to disk. No-op in memory-only mode.
    pub fn flush(&self) {
        self.store.flush();
    }
}

/// Configures a [`FeOxDbBackend`].
///
/// Without [`path`](Self::path) the database lives in memory only.
#[derive(Debug)]
pub struct FeOxDbBackendBuilder {
    file: Option<PathBuf>,
    file_size: Option<u64>,
    memory: Option<usize>,
    label: BackendLabel,
}

impl Default for FeOxDbBackendBuilder {
    fn default() -> Self {
        FeOxDbBackendBuilder {
            file: None,
            file_size: None,
            memory: None,
            label: BackendLabel::new_static("feoxdb"),
        }
    }
}

const DB_FILE_NAME: &str = "cache.db";

impl FeOxDbBackendBuilder {
    /// Database file. A directory gets a `cache.db` inside it.
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        FeOxDbBackendBuilder {
            file: Some(path.into()),
            ..self
        }
    }

    /// Size the database file is pre-allocated to, and may not outgrow.
    pub fn max_file_size(self, bytes: u64) -> Self {
        FeOxDbBackendBuilder {
            file_size: Some(bytes),
            ..self
        }
    }

    /// Bound on the in-memory read cache, or on all data without a path.
    pub fn max_memory(self, bytes: usize) -> Self {
        FeOxDbBackendBuilder {
            memory: Some(bytes),
            ..self
        }
    }

    pub fn label(self, label: impl Into<BackendLabel>) -> Self {
        FeOxDbBackendBuilder {
            label: label.into(),
            ..self
        }
    }

    /// Opens, or creates, the database.
    pub fn build(self) -> Result<FeOxDbBackend, FeOxDbError> {
        let FeOxDbBackendBuilder {
            file,
            file_size,
            memory,
            label,
        } = self;

        let mut store = FeoxStore::builder().enable_ttl(true);
        if let Some(bytes) = file_size {
            store = store.file_size(bytes);
        }
        if let Some(bytes) = memory {
            store = store.max_memory(bytes);
        }

        let store = match file {
            None => store.build().map_err(FeOxDbError::Create)?,
            Some(path) => {
                let path = if path.is_dir() {
                    path.join(DB_FILE_NAME)
                } else {
                    path
                };
                let device = path.to_string_lossy().into_owned();
                store
                    .device_path(device)
                    .build()
                    .map_err(|source| FeOxDbError::Open { path, source })?
            }
        };

        Ok(FeOxDbBackend {
            store: Arc::new(store),
            label,
        })
    }
}

impl FeOxDbBackend {
    /// Runs a store operation on the blocking pool with the key rendered to bytes.
    async fn with_store<T, F>(&self, key: &CacheKey, op: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FeoxStore, &[u8]) -> BackendResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || op(&store, key.as_bytes()))
            .await
            .map_err(BackendError::internal)?
    }
}

#[async_trait]
impl Backend for FeOxDbBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        self.with_store(key, |store, key| {
            let encoded = match store.get(key) {
                Ok(encoded) => encoded,
                Err(FeoxError::KeyNotFound) => return Ok(None),
                Err(error) => return Err(BackendError::internal(error)),
            };
            decode_from_slice::<CacheValue<Raw>, _>(&encoded, bincode_config())
                .map(|(value, _)| Some(value))
                .map_err(BackendError::internal)
        })
        .await
    }

    async fn write(
        &self,
        key: &CacheKey,
        value: CacheValue<Raw>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        let encoded = encode_to_vec(&value, bincode_config()).map_err(BackendError::internal)?;
        self.with_store(key, move |store, key| {
            let written = match ttl {
                // Whole seconds only; a sub-second hint still keeps the entry for one.
                Some(ttl) => store.insert_with_ttl(key, &encoded, ttl.as_secs().max(1)),
                None => store.insert(key, &encoded),
            };
            written.map(drop).map_err(BackendError::internal)
        })
        .await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        self.with_store(key, |store, key| {
            if !store.contains_key(key) {
                return Ok(DeleteStatus::Missing);
            }
            store.delete(key).map_err(BackendError::internal)?;
            Ok(DeleteStatus::Deleted(1))
        })
        .await
    }

    fn tier(&self) -> CacheType {
        CacheType::Disk
    }

    fn label(&self) -> BackendLabel {
        self.label.clone()
    }
}
