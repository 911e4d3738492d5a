#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Caller-driven cancellation signal.
pub mod cancel;

/// The verb-shaped [`HttpClient`] and its builder.
pub mod client;

/// Static client configuration, per-call options and context-derived URLs.
pub mod config;

mod context;

/// Error taxonomy surfaced to callers.
///
/// [`Error`] is `Clone` so one failed execution can be handed to every
/// caller that shared it.
pub mod error;

/// In-flight deduplication map.
pub mod inflight;

/// Cache and in-flight key derivation.
pub mod key;

/// Metrics sink seam and, with the `metrics` feature, a sink forwarding to
/// the `metrics` crate.
pub mod metrics;

/// Onion-style stage executor.
pub mod pipeline;

/// Pass-through hook observing final request/response pairs.
pub mod recorder;

pub mod request;
pub mod response;

/// Stages composed by [`HttpClient`].
pub mod stages;

/// Network transport and retry policy.
pub mod transport;

pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use client::{HttpClient, HttpClientBuilder};
pub use config::{
    AuthType, ClientConfig, InstanceOptions, IoContext, LegacyOptions, RequestOptions,
};
pub use context::CallContext;
pub use error::{Error, Result, TransportErrorKind};
pub use metrics::{MetricValue, MetricsSink};
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub use metrics::FacadeMetricsSink;
pub use pipeline::{Next, Pipeline, Stage};
pub use recorder::Recorder;
pub use request::{Directives, RequestBody, RequestDescriptor, ResponseType, StreamBody};
pub use response::{
    BufferResponse, ByteStream, CacheHit, CacheSource, IoResponse, Response, ResponseBody,
};
pub use transport::{ReqwestTransport, RetryPolicy, Transport};

pub use courier_core::{CacheKey, CacheType};
