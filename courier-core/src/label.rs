//! Names for cache stores in log fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::CacheType;

/// Name of a cache store, e.g. `moka` or `feoxdb`.
///
/// Stores that don't name themselves fall back to their tier:
///
/// ```
/// use courier_core::{BackendLabel, CacheType};
///
/// assert_eq!(BackendLabel::for_tier(CacheType::Disk), "disk");
/// assert_eq!(BackendLabel::from("catalog-moka").to_string(), "catalog-moka");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendLabel(SmolStr);

impl BackendLabel {
    pub const fn new_static(name: &'static str) -> Self {
        Self(SmolStr::new_static(name))
    }

    /// Label derived from the tier a store implements.
    pub const fn for_tier(tier: CacheType) -> Self {
        Self::new_static(tier.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for BackendLabel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for BackendLabel {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for BackendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendLabel {
    fn from(name: &str) -> Self {
        Self(SmolStr::new(name))
    }
}

impl From<String> for BackendLabel {
    fn from(name: String) -> Self {
        Self(SmolStr::from(name))
    }
}
