//! Cache and in-flight key derivation.
//!
//! A cache key is built from the method, the fully qualified URL, the query
//! parameters sorted by name and any configured vary headers:
//!
//! ```
//! use courier::key::cache_key;
//! use courier::RequestDescriptor;
//! use http::Method;
//!
//! let first = RequestDescriptor::new(Method::GET, "/items")
//!     .with_base_url("http://api")
//!     .with_param("b", "2")
//!     .with_param("a", "1");
//! let second = RequestDescriptor::new(Method::GET, "/items")
//!     .with_base_url("http://api")
//!     .with_params([("a", "1"), ("b", "2")]);
//!
//! assert_eq!(cache_key(&first, &[]), cache_key(&second, &[]));
//! assert_eq!(
//!     cache_key(&first, &[]).to_string(),
//!     "courier:v1:method=GET&url=http://api/items&query.a=1&query.b=2"
//! );
//! ```

use courier_core::{CacheKey, KeyPart, KeyParts};
use http::HeaderName;
use http::header::IF_NONE_MATCH;

use crate::request::RequestDescriptor;

const KEY_PREFIX: &str = "courier";
const KEY_VERSION: u32 = 1;

/// Key used to read and write cache stores.
pub fn cache_key(request: &RequestDescriptor, vary_headers: &[HeaderName]) -> CacheKey {
    let mut parts = KeyParts::new();
    parts.push(KeyPart::new("method", Some(request.method().as_str())));
    parts.push(KeyPart::new("url", Some(request.url())));
    parts.extend_sorted(
        request
            .params()
            .iter()
            .map(|(name, value)| KeyPart::new(format!("query.{name}"), Some(value.as_str()))),
    );
    for name in vary_headers {
        if let Some(value) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            parts.push(KeyPart::new(format!("header.{name}"), Some(value)));
        }
    }
    parts.into_cache_key(KEY_PREFIX, KEY_VERSION)
}

/// Key used to deduplicate concurrent calls.
///
/// The request's own key function wins; otherwise this is the cache key.
/// A conditional request (`If-None-Match`) never shares an execution with
/// an unconditional one.
pub fn inflight_key(request: &RequestDescriptor, vary_headers: &[HeaderName]) -> CacheKey {
    let key = match &request.directives().inflight_key {
        Some(key_fn) => CacheKey::from_raw(key_fn(request)),
        None => cache_key(request, vary_headers),
    };
    match request.headers().get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        Some(etag) => key.with_part(KeyPart::new("if-none-match", Some(etag))),
        None => key,
    }
}

/// In-flight key function that ignores query parameters.
pub fn inflight_url(request: &RequestDescriptor) -> String {
    format!("{} {}", request.method(), request.url())
}
