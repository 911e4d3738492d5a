//! # courier-core
//!
//! Storage-level types for the courier outbound HTTP pipeline.
//!
//! This crate knows nothing about HTTP. It provides the vocabulary that the
//! cache stores (`courier-moka`, `courier-feoxdb`) and the pipeline
//! (`courier`) share:
//!
//! - [`CacheKey`] / [`KeyPart`] - stable, order-independent cache keys
//! - [`CacheValue`] - a stored entry with `stored_at` and `ttl`
//! - [`CacheType`] - which storage tier(s) a request may use
//! - [`BackendLabel`] - names a cache store in log fields

pub mod cache_type;
pub mod key;
pub mod label;
pub mod value;

pub use cache_type::CacheType;
pub use key::{CacheKey, KeyPart, KeyParts};
pub use label::BackendLabel;
pub use value::{CacheMeta, CacheValue};

#[doc(hidden)]
pub use smol_str::SmolStr;

/// Raw byte data type used for serialized cache values.
/// Using `Bytes` provides efficient zero-copy cloning via reference counting.
pub type Raw = bytes::Bytes;
