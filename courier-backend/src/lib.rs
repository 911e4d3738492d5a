//! Traits and structs for courier cache store interaction.
//!
//! A store only moves bytes: [`Backend`] reads and writes
//! [`CacheValue<Raw>`](courier_core::CacheValue) with a TTL hint. The typed
//! layer, [`CacheBackend`], encodes values as JSON on top of it and is
//! implemented for every backend automatically.
mod backend;
mod error;

pub use backend::{Backend, BackendResult, CacheBackend};
pub use error::BackendError;

/// Status of deleting result.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}
