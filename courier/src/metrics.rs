//! Metrics sink seam and the `metrics`-crate backed implementation.

use std::time::Duration;

/// Value of one metric sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Duration(Duration),
    Count(u64),
}

/// Receives request metrics. Fire-and-forget: implementations must not
/// block and must not fail the call.
pub trait MetricsSink: Send + Sync {
    fn batch(&self, name: &str, value: MetricValue, tags: &[(&'static str, String)]);
}

#[cfg(feature = "metrics")]
pub use facade::{FacadeMetricsSink, REQUEST_COUNT, REQUEST_DURATION};

#[cfg(feature = "metrics")]
mod facade {
    use lazy_static::lazy_static;

    use super::{MetricValue, MetricsSink};

    lazy_static! {
        /// Histogram of request duration, labelled by client name, status and cache source.
        pub static ref REQUEST_DURATION: &'static str = {
            metrics::describe_histogram!(
                "courier_request_duration_seconds",
                metrics::Unit::Seconds,
                "Duration of outbound requests in seconds."
            );
            "courier_request_duration_seconds"
        };
        /// Counter samples batched by callers.
        pub static ref REQUEST_COUNT: &'static str = {
            metrics::describe_counter!(
                "courier_requests_total",
                "Total number of outbound requests."
            );
            "courier_requests_total"
        };
    }

    /// [`MetricsSink`] forwarding to the global `metrics` recorder.
    ///
    /// The batch name becomes the `name` label.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FacadeMetricsSink;

    impl MetricsSink for FacadeMetricsSink {
        fn batch(&self, name: &str, value: MetricValue, tags: &[(&'static str, String)]) {
            let mut labels = Vec::with_capacity(tags.len() + 1);
            labels.push(("name", name.to_owned()));
            labels.extend(tags.iter().cloned());

            match value {
                MetricValue::Duration(duration) => {
                    metrics::histogram!(*REQUEST_DURATION, &labels).record(duration.as_secs_f64())
                }
                MetricValue::Count(count) => {
                    metrics::counter!(*REQUEST_COUNT, &labels).increment(count)
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use std::time::Duration;

        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        use super::*;

        #[test]
        fn duration_lands_in_histogram_with_labels() {
            let recorder = DebuggingRecorder::new();
            let snapshotter = recorder.snapshotter();

            metrics::with_local_recorder(&recorder, || {
                FacadeMetricsSink.batch(
                    "http-client-catalog",
                    MetricValue::Duration(Duration::from_millis(250)),
                    &[("status", "200".to_owned())],
                );
            });

            let snapshot = snapshotter.snapshot().into_vec();
            let (key, _, _, value) = snapshot
                .iter()
                .find(|(key, ..)| key.key().name() == "courier_request_duration_seconds")
                .expect("histogram recorded");

            let labels: Vec<_> = key
                .key()
                .labels()
                .map(|label| (label.key().to_owned(), label.value().to_owned()))
                .collect();
            assert!(labels.contains(&("name".to_owned(), "http-client-catalog".to_owned())));
            assert!(labels.contains(&("status".to_owned(), "200".to_owned())));
            match value {
                DebugValue::Histogram(samples) => {
                    assert_eq!(samples.len(), 1);
                    assert!((samples[0].into_inner() - 0.25).abs() < 1e-9);
                }
                other => panic!("unexpected metric value: {other:?}"),
            }
        }
    }
}
