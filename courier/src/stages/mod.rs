//! The stage set.
//!
//! [`HttpClient`](crate::HttpClient) composes them in this order, skipping
//! the optional ones that were not configured:
//!
//! | stage                  | optional | role |
//! |------------------------|----------|------|
//! | [`DefaultsStage`]      |          | base URL, default headers, timeout |
//! | [`RecorderStage`]      | yes      | hands the final pair to a recorder |
//! | [`AcceptNotFoundStage`]|          | lets 404 through when asked to |
//! | [`CacheStage`] memory  | yes      | read, revalidate, write |
//! | [`CacheStage`] disk    | yes      | read, revalidate, write |
//! | [`NotFoundFallbackStage`] |       | turns an accepted 404 into null |
//! | [`MetricsStage`]       | yes      | reports duration and outcome |
//! | [`MemoizationStage`]   |          | shares concurrent identical calls |
//! | [`TransportStage`]     |          | network call, retries, timeout |

mod cache;
mod defaults;
mod memoization;
mod metrics;
mod not_found;
mod recorder;
mod transport;

pub use cache::{CacheStage, freshness_lifetime};
pub use defaults::DefaultsStage;
pub use memoization::MemoizationStage;
pub use metrics::MetricsStage;
pub use not_found::{AcceptNotFoundStage, NotFoundFallbackStage};
pub use recorder::RecorderStage;
pub use transport::TransportStage;
