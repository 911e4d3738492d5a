//! Cached value types with freshness metadata.
//!
//! A [`CacheValue`] is what a cache store hands back: the data plus the time
//! it was stored and the TTL it was stored with. Freshness is always judged
//! by the reader, so a store that keeps an entry past its TTL (for example to
//! allow conditional revalidation) never serves it as fresh.
//!
//! ```
//! use chrono::{Duration, Utc};
//! use courier_core::CacheValue;
//!
//! let stored_at = Utc::now();
//! let value = CacheValue::with_stored_at("payload", stored_at, 60);
//!
//! assert!(value.is_fresh_at(stored_at + Duration::seconds(59), None));
//! assert!(!value.is_fresh_at(stored_at + Duration::seconds(60), None));
//! // A forced max age replaces the stored TTL for the comparison.
//! assert!(value.is_fresh_at(stored_at + Duration::seconds(90), Some(120)));
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with freshness metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue<T> {
    data: T,
    stored_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl<T> CacheValue<T> {
    /// Creates a value stored now with the given TTL in seconds.
    pub fn new(data: T, ttl_seconds: u64) -> Self {
        Self::with_stored_at(data, Utc::now(), ttl_seconds)
    }

    /// Creates a value with an explicit store timestamp.
    pub fn with_stored_at(data: T, stored_at: DateTime<Utc>, ttl_seconds: u64) -> Self {
        CacheValue {
            data,
            stored_at,
            ttl_seconds,
        }
    }

    /// Returns a reference to the cached data.
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// When the value was stored.
    #[inline]
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// TTL the value was stored with, in seconds.
    #[inline]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Instant after which the value is no longer fresh.
    ///
    /// `max_age_override` replaces the stored TTL when set.
    pub fn expires_at(&self, max_age_override: Option<u64>) -> DateTime<Utc> {
        let ttl = max_age_override.unwrap_or(self.ttl_seconds);
        i64::try_from(ttl)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the value is fresh at `now`: `now < stored_at + ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age_override: Option<u64>) -> bool {
        now < self.expires_at(max_age_override)
    }

    /// Whether the value is fresh right now.
    pub fn is_fresh(&self, max_age_override: Option<u64>) -> bool {
        self.is_fresh_at(Utc::now(), max_age_override)
    }

    /// Consumes the cache value and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Splits the value into metadata and data.
    pub fn into_parts(self) -> (CacheMeta, T) {
        (
            CacheMeta {
                stored_at: self.stored_at,
                ttl_seconds: self.ttl_seconds,
            },
            self.data,
        )
    }

    /// Rebuilds a value from metadata and data.
    pub fn from_parts(meta: CacheMeta, data: T) -> Self {
        Self::with_stored_at(data, meta.stored_at, meta.ttl_seconds)
    }
}

/// Freshness metadata without the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// When the value was stored.
    pub stored_at: DateTime<Utc>,
    /// TTL the value was stored with, in seconds.
    pub ttl_seconds: u64,
}
