//! Request counters
//!
//! The proxy only emits increments through [`MetricsSink`]. [`ProxyMetrics`]
//! records them into its own Prometheus recorder and renders them for the
//! `/metrics` endpoint.

use metrics::{counter, describe_counter, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

const STATUS_CODES: &str = "status_codes";
const REQUEST_TIMEOUTS: &str = "request_timeouts";
const REQUEST_ERRORS: &str = "request_errors";
const REQUEST_SUM: &str = "request_sum";
const REQUEST_SUCCESS: &str = "request_success";

/// Label set shared by the per-request counters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestLabels {
    pub initial_user: String,
    pub execution_user: String,
    pub host: String,
}

impl RequestLabels {
    pub fn new(initial_user: &str, execution_user: &str, host: &str) -> Self {
        Self {
            initial_user: initial_user.to_string(),
            execution_user: execution_user.to_string(),
            host: host.to_string(),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("initial_user", &self.initial_user),
            ("execution_user", &self.execution_user),
            ("host", &self.host),
        ]
    }
}

pub trait MetricsSink: Send + Sync {
    /// Status code returned by a backend node
    fn status_code(&self, host: &str, code: u16);

    /// A request exceeded one of its execution-time limits
    fn timeout(&self, labels: &RequestLabels);

    /// A request to a backend node failed
    fn error(&self, host: &str, message: &str);

    /// A request was admitted and sent
    fn request_sum(&self, labels: &RequestLabels);

    /// A sent request completed
    fn request_success(&self, labels: &RequestLabels);
}

/// Labeled counters backed by a Prometheus recorder owned by this instance
pub struct ProxyMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        with_local_recorder(&recorder, || {
            describe_counter!(STATUS_CODES, "Distribution by status codes counter");
            describe_counter!(REQUEST_TIMEOUTS, "Number of timeouts");
            describe_counter!(
                REQUEST_ERRORS,
                "Number of errors returned by target. Including amount of timeouts"
            );
            describe_counter!(REQUEST_SUM, "Total number of sent requests");
            describe_counter!(REQUEST_SUCCESS, "Total number of sent success requests");
        });

        Self { recorder, handle }
    }

    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        let labels: Vec<(&'static str, String)> = labels
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect();
        with_local_recorder(&self.recorder, || counter!(name, &labels).increment(1));
    }

    /// Current value of the series with exactly these labels
    fn sample(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.samples(name, labels, true).into_iter().sum()
    }

    /// Values of the series of `name` whose label set starts with `labels`
    ///
    /// Label values are matched as rendered, so they must not need escaping.
    fn samples(&self, name: &str, labels: &[(&str, &str)], exact: bool) -> Vec<u64> {
        let prefix = labels
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, value))
            .collect::<Vec<_>>()
            .join(",");
        let prefix = format!("{}{{{}", name, prefix);

        self.render()
            .lines()
            .filter_map(|line| {
                let (series, value) = line.strip_prefix(&prefix)?.rsplit_once(' ')?;
                let matches = series == "}" || (!exact && series.starts_with(','));
                if !matches {
                    return None;
                }
                value.parse::<f64>().ok().map(|value| value as u64)
            })
            .collect()
    }

    pub fn status_code_count(&self, host: &str, code: u16) -> u64 {
        self.sample(STATUS_CODES, &[("host", host), ("code", &code.to_string())])
    }

    pub fn timeout_count(&self, labels: &RequestLabels) -> u64 {
        self.sample(REQUEST_TIMEOUTS, &labels.pairs())
    }

    pub fn error_count(&self, host: &str, message: &str) -> u64 {
        self.sample(REQUEST_ERRORS, &[("host", host), ("message", message)])
    }

    /// Sum of error counts for a host across all messages
    pub fn host_error_count(&self, host: &str) -> u64 {
        self.samples(REQUEST_ERRORS, &[("host", host)], false)
            .into_iter()
            .sum()
    }

    pub fn request_sum_count(&self, labels: &RequestLabels) -> u64 {
        self.sample(REQUEST_SUM, &labels.pairs())
    }

    pub fn request_success_count(&self, labels: &RequestLabels) -> u64 {
        self.sample(REQUEST_SUCCESS, &labels.pairs())
    }

    /// Renders every counter in the Prometheus text exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for ProxyMetrics {
    fn status_code(&self, host: &str, code: u16) {
        self.increment(STATUS_CODES, &[("host", host), ("code", &code.to_string())]);
    }

    fn timeout(&self, labels: &RequestLabels) {
        self.increment(REQUEST_TIMEOUTS, &labels.pairs());
    }

    fn error(&self, host: &str, message: &str) {
        self.increment(REQUEST_ERRORS, &[("host", host), ("message", message)]);
    }

    fn request_sum(&self, labels: &RequestLabels) {
        self.increment(REQUEST_SUM, &labels.pairs());
    }

    fn request_success(&self, labels: &RequestLabels) {
        self.increment(REQUEST_SUCCESS, &labels.pairs());
    }
}
