//! Builder for configuring [`MokaBackend`].

use std::time::{Duration, Instant};

use courier_core::{BackendLabel, CacheKey};
use moka::Expiry;
use moka::future::CacheBuilder;

use crate::backend::{MokaBackend, Stored};

const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Each entry lives for the retention hint it was written with.
struct RetentionHint;

impl Expiry<CacheKey, Stored> for RetentionHint {
    fn expire_after_create(&self, _: &CacheKey, stored: &Stored, _: Instant) -> Option<Duration> {
        stored.retain
    }

    // Moka keeps the previous deadline on update unless told otherwise.
    fn expire_after_update(
        &self,
        _: &CacheKey,
        stored: &Stored,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        stored.retain
    }
}

#[derive(Debug, Clone, Copy)]
enum Capacity {
    Entries(u64),
    Bytes(u64),
}

/// Configures a [`MokaBackend`].
///
/// Without an explicit bound the store holds up to 10 000 entries.
///
/// ```
/// use courier_moka::MokaBackend;
///
/// let backend = MokaBackend::builder()
///     .label("catalog")
///     .max_bytes(64 * 1024 * 1024)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct MokaBackendBuilder {
    capacity: Capacity,
    label: BackendLabel,
}

impl Default for MokaBackendBuilder {
    fn default() -> Self {
        MokaBackendBuilder {
            capacity: Capacity::Entries(DEFAULT_MAX_ENTRIES),
            label: BackendLabel::new_static("moka"),
        }
    }
}

impl MokaBackendBuilder {
    /// Bounds the store by entry count.
    pub fn max_entries(mut self, entries: u64) -> Self {
        self.capacity = Capacity::Entries(entries);
        self
    }

    /// Bounds the store by approximate size: key rendering plus payload
    /// length per entry.
    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.capacity = Capacity::Bytes(bytes);
        self
    }

    /// Name of the store in log fields.
    pub fn label(mut self, label: impl Into<BackendLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Creates the backend.
    pub fn build(self) -> MokaBackend {
        let builder = match self.capacity {
            Capacity::Entries(entries) => CacheBuilder::new(entries),
            Capacity::Bytes(bytes) => CacheBuilder::new(bytes).weigher(weigh),
        };
        MokaBackend {
            cache: builder.expire_after(RetentionHint).build(),
            label: self.label,
        }
    }
}

fn weigh(key: &CacheKey, stored: &Stored) -> u32 {
    let weight = key.to_string().len() + stored.value.data().len();
    u32::try_from(weight).unwrap_or(u32::MAX)
}
