//! Storage classes a request may be cached in.

use serde::{Deserialize, Serialize};

/// Which storage tier(s) a request is eligible to use.
///
/// A store declares the single tier it implements (`Memory` or `Disk`); a
/// request declares what it accepts. `Any` accepts both tiers, `None` opts
/// out of caching entirely.
///
/// ```
/// use courier_core::CacheType;
///
/// assert!(CacheType::Any.accepts(CacheType::Disk));
/// assert!(CacheType::Memory.accepts(CacheType::Memory));
/// assert!(!CacheType::Memory.accepts(CacheType::Disk));
/// assert!(!CacheType::None.accepts(CacheType::Memory));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Not cacheable.
    #[default]
    None,
    /// Process memory only.
    Memory,
    /// Disk only.
    Disk,
    /// Any tier.
    Any,
}

impl CacheType {
    /// Whether a request with this class may use a store of `tier`.
    pub fn accepts(self, tier: CacheType) -> bool {
        match (self, tier) {
            (CacheType::None, _) | (_, CacheType::None) => false,
            (CacheType::Any, _) => true,
            (requested, tier) => requested == tier,
        }
    }

    /// Whether the class opts into any caching at all.
    pub fn is_cacheable(self) -> bool {
        self != CacheType::None
    }

    /// Lowercase name, used as a metric label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheType::None => "none",
            CacheType::Memory => "memory",
            CacheType::Disk => "disk",
            CacheType::Any => "any",
        }
    }
}
