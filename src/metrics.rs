//! The metrics sink the client reports timings and counts to.
//!
//! The client records three series:
//!
//! - [`REQUEST_DURATION`]: one timer per attempt, labelled `service`, `method`.
//! - [`REQUEST_FAILURES`]: one increment per failed attempt that was retried or
//!   ended the call, labelled `service`, `method`, `status_code`, `type`.
//! - [`REQUEST_RETRIES`]: one increment per retry, labelled `service`, `method`.

use prometheus::proto::Metric;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Histogram of attempt durations, in seconds.
pub const REQUEST_DURATION: &str = "grpc_client_request_duration_seconds";
/// Counter of failed attempts.
pub const REQUEST_FAILURES: &str = "grpc_client_request_failures_total";
/// Counter of retries.
pub const REQUEST_RETRIES: &str = "grpc_client_request_retries_total";

/// An ordered set of metric labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<(&'static str, String)>);

impl Labels {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label.
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.0.push((name, value.into()));
        self
    }

    /// Returns the value of a label.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(key, value)| (*key, value.as_str()))
    }
}

/// Stops a running timer and records its observation.
pub type StopTimer = Box<dyn FnOnce() + Send>;

/// Receives call metrics.
///
/// Implementations must be safe to share between concurrent calls.
pub trait Metrics: Send + Sync {
    /// Starts a histogram timer. The returned closure records the elapsed time.
    fn start_timer(&self, metric: &str, labels: &Labels) -> StopTimer;

    /// Increments a counter by one.
    fn increment(&self, metric: &str, labels: &Labels);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn start_timer(&self, _metric: &str, _labels: &Labels) -> StopTimer {
        Box::new(|| {})
    }

    fn increment(&self, _metric: &str, _labels: &Labels) {}
}

/// Count and sum of a histogram series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observations {
    /// Number of observations
    pub count: u64,
    /// Sum of observed seconds
    pub sum: f64,
}

const CALL_LABELS: &[&str] = &["service", "method"];
const FAILURE_LABELS: &[&str] = &["service", "method", "status_code", "type"];

/// Attempt duration buckets, in seconds. The default attempt timeout is 15s.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0,
];

/// Records the client series in a `prometheus` registry.
///
/// Labels a series does not declare are ignored, and declared labels that are
/// missing are recorded as empty. Metrics other than the three client series
/// are dropped.
///
/// # Examples
///
/// ```
/// use grpcall::metrics::{Labels, Metrics, PrometheusMetrics, REQUEST_RETRIES};
///
/// let metrics = PrometheusMetrics::new().unwrap();
/// let labels = Labels::new().with("service", "svc").with("method", "Call");
/// metrics.increment(REQUEST_RETRIES, &labels);
///
/// assert_eq!(metrics.counter(REQUEST_RETRIES, &labels), 1);
/// let text = metrics.render().unwrap();
/// assert!(text.contains("# TYPE grpc_client_request_retries_total counter"));
/// ```
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    duration: HistogramVec,
    failures: IntCounterVec,
    retries: IntCounterVec,
}

impl PrometheusMetrics {
    /// Creates the client series in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Creates the client series in `registry`.
    ///
    /// # Errors
    ///
    /// Fails if the registry already holds series with the same names.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let duration = HistogramVec::new(
            HistogramOpts::new(REQUEST_DURATION, "Duration of gRPC call attempts in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            CALL_LABELS,
        )?;
        registry.register(Box::new(duration.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(REQUEST_FAILURES, "Total failed gRPC call attempts"),
            FAILURE_LABELS,
        )?;
        registry.register(Box::new(failures.clone()))?;

        let retries = IntCounterVec::new(
            Opts::new(REQUEST_RETRIES, "Total gRPC call retries"),
            CALL_LABELS,
        )?;
        registry.register(Box::new(retries.clone()))?;

        Ok(Self {
            registry,
            duration,
            failures,
            retries,
        })
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the value of a counter series.
    pub fn counter(&self, metric: &str, labels: &Labels) -> u64 {
        self.find(metric, labels)
            .map_or(0, |m| m.get_counter().get_value() as u64)
    }

    /// Returns the observations of a histogram series.
    pub fn observations(&self, metric: &str, labels: &Labels) -> Observations {
        self.find(metric, labels)
            .map(|m| {
                let histogram = m.get_histogram();
                Observations {
                    count: histogram.get_sample_count(),
                    sum: histogram.get_sample_sum(),
                }
            })
            .unwrap_or_default()
    }

    /// Renders every series in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn counter_vec(&self, metric: &str) -> Option<(&IntCounterVec, &'static [&'static str])> {
        match metric {
            REQUEST_FAILURES => Some((&self.failures, FAILURE_LABELS)),
            REQUEST_RETRIES => Some((&self.retries, CALL_LABELS)),
            _ => None,
        }
    }

    /// Reads a series without creating it.
    fn find(&self, metric: &str, labels: &Labels) -> Option<Metric> {
        let family = self
            .registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == metric)?;

        family.get_metric().iter().find(|m| same_labels(m, labels)).cloned()
    }
}

impl Metrics for PrometheusMetrics {
    fn start_timer(&self, metric: &str, labels: &Labels) -> StopTimer {
        if metric != REQUEST_DURATION {
            tracing::debug!(metric, "Ignoring unknown histogram");
            return Box::new(|| {});
        }

        let timer = self
            .duration
            .with_label_values(&label_values(CALL_LABELS, labels))
            .start_timer();
        Box::new(move || timer.observe_duration())
    }

    fn increment(&self, metric: &str, labels: &Labels) {
        match self.counter_vec(metric) {
            Some((counter, names)) => counter.with_label_values(&label_values(names, labels)).inc(),
            None => tracing::debug!(metric, "Ignoring unknown counter"),
        }
    }
}

fn label_values<'a>(names: &[&str], labels: &'a Labels) -> Vec<&'a str> {
    names
        .iter()
        .map(|name| labels.get(name).unwrap_or(""))
        .collect()
}

/// Compares as sets; gathered label pairs come back sorted by name.
fn same_labels(metric: &Metric, labels: &Labels) -> bool {
    let pairs = metric.get_label();
    pairs.len() == labels.iter().count()
        && labels.iter().all(|(name, value)| {
            pairs
                .iter()
                .any(|pair| pair.get_name() == name && pair.get_value() == value)
        })
}

/// A running attempt timer that is stopped at most once.
///
/// Dropping a timer that was never stopped stops it, so an abandoned call
/// still records its attempt.
pub(crate) struct MetricsTimer {
    stop: Option<StopTimer>,
}

impl MetricsTimer {
    pub(crate) fn start(metrics: &dyn Metrics, metric: &str, labels: &Labels) -> Self {
        Self {
            stop: Some(metrics.start_timer(metric, labels)),
        }
    }

    pub(crate) fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
