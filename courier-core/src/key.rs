//! Cache keys.
//!
//! A key renders as `{prefix}:v{version}:{part}&{part}...`, where a part is
//! either `name=value` or a bare `name`. An empty prefix and version `0` are
//! left out:
//!
//! ```
//! use courier_core::{CacheKey, KeyPart};
//!
//! let key = CacheKey::new("api", 1, vec![KeyPart::new("id", Some("42"))]);
//! assert_eq!(key.to_string(), "api:v1:id=42");
//!
//! let key = CacheKey::new("", 0, vec![
//!     KeyPart::new("method", Some("GET")),
//!     KeyPart::new("cached", None::<&str>),
//! ]);
//! assert_eq!(key.to_string(), "method=GET&cached");
//! ```

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;

/// Identifies one cached entry, and one in-flight execution.
///
/// Cloning is a reference count bump. Equality compares prefix, version and
/// the ordered parts; callers that need order independence sort their parts
/// first (see [`KeyParts::extend_sorted`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<Fields>);

#[derive(Debug, PartialEq, Eq, Hash)]
struct Fields {
    prefix: SmolStr,
    version: u32,
    parts: Box<[KeyPart]>,
}

impl CacheKey {
    pub fn new(prefix: impl Into<SmolStr>, version: u32, parts: Vec<KeyPart>) -> Self {
        CacheKey(Arc::new(Fields {
            prefix: prefix.into(),
            version,
            parts: parts.into_boxed_slice(),
        }))
    }

    /// A key made of one opaque string, rendered as-is.
    pub fn from_raw(raw: impl Into<SmolStr>) -> Self {
        Self::new(SmolStr::default(), 0, vec![KeyPart::flag(raw)])
    }

    pub fn prefix(&self) -> &str {
        &self.0.prefix
    }

    pub fn version(&self) -> u32 {
        self.0.version
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0.parts
    }

    /// This key with `part` appended.
    pub fn with_part(&self, part: KeyPart) -> CacheKey {
        let mut parts = self.0.parts.to_vec();
        parts.push(part);
        CacheKey::new(self.0.prefix.clone(), self.0.version, parts)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Fields {
            prefix,
            version,
            parts,
        } = &*self.0;
        if !prefix.is_empty() {
            f.write_str(prefix)?;
            f.write_str(":")?;
        }
        if *version != 0 {
            write!(f, "v{version}:")?;
        }
        let mut separator = "";
        for part in parts.iter() {
            write!(f, "{separator}{part}")?;
            separator = "&";
        }
        Ok(())
    }
}

/// One `name[=value]` component of a [`CacheKey`].
///
/// Orders by name, then value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPart {
    name: SmolStr,
    value: Option<SmolStr>,
}

impl KeyPart {
    pub fn new(name: impl Into<SmolStr>, value: Option<impl Into<SmolStr>>) -> Self {
        KeyPart {
            name: name.into(),
            value: value.map(Into::into),
        }
    }

    /// A part without a value.
    pub fn flag(name: impl Into<SmolStr>) -> Self {
        KeyPart {
            name: name.into(),
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(value) = &self.value {
            write!(f, "={value}")?;
        }
        Ok(())
    }
}

/// Collects parts while a key is being derived.
#[derive(Debug, Default, Clone)]
pub struct KeyParts(Vec<KeyPart>);

impl KeyParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: KeyPart) {
        self.0.push(part);
    }

    /// Appends `parts` in sorted order, whatever order they arrive in.
    pub fn extend_sorted(&mut self, parts: impl IntoIterator<Item = KeyPart>) {
        let start = self.0.len();
        self.0.extend(parts);
        self.0[start..].sort_unstable();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_cache_key(self, prefix: impl Into<SmolStr>, version: u32) -> CacheKey {
        CacheKey::new(prefix, version, self.0)
    }
}
