//! Request records and their aggregation.
//!
//! Virtual users push one [`RequestRecord`] per attempt into a shared
//! [`MetricsCollector`]. After the run, [`MetricsSummary::from_records`]
//! reduces a snapshot to counts, error breakdowns and latency statistics.
//!
//! Percentiles come from HdrHistograms at microsecond resolution (3
//! significant figures, auto-resize). Mean, standard deviation, min and max
//! are computed exactly from the recorded durations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use crate::loadtest::error::RequestError;
use crate::loadtest::target::InvokeResponse;

/// One request attempt as seen by a virtual user.
///
/// Records are immutable once appended to a [`MetricsCollector`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Wall-clock time the request was issued.
    pub timestamp: DateTime<Utc>,
    /// Issue to full response, measured client side.
    pub request_latency: Duration,
    /// Server-reported processing time, zero when absent or failed.
    pub prediction_latency: Duration,
    pub success: bool,
    /// HTTP status, when one was received.
    pub status_code: Option<u16>,
    /// Failure cause, `None` on success.
    pub error: Option<RequestError>,
}

impl RequestRecord {
    pub fn success(
        timestamp: DateTime<Utc>,
        request_latency: Duration,
        response: &InvokeResponse,
    ) -> Self {
        Self {
            timestamp,
            request_latency,
            prediction_latency: response.prediction_latency,
            success: true,
            status_code: Some(response.status),
            error: None,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>, request_latency: Duration, err: RequestError) -> Self {
        Self {
            timestamp,
            request_latency,
            prediction_latency: Duration::ZERO,
            success: false,
            status_code: err.status_code(),
            error: Some(err),
        }
    }

    /// A request that was still in flight when its user was force-terminated.
    pub fn aborted(timestamp: DateTime<Utc>, request_latency: Duration) -> Self {
        Self::failure(timestamp, request_latency, RequestError::Aborted)
    }

    pub fn error_category(&self) -> Option<&'static str> {
        self.error.as_ref().map(RequestError::error_category)
    }

    /// The HTTP status code, or the error category when none was received.
    pub fn status_label(&self) -> String {
        match (self.status_code, self.error_category()) {
            (Some(code), _) => code.to_string(),
            (None, Some(category)) => category.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Thread-safe append-only store of [`RequestRecord`]s.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    records: Arc<Mutex<Vec<RequestRecord>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Holds the lock only for the push.
    pub fn append(&self, record: RequestRecord) {
        self.records.lock().push(record);
    }

    /// Consistent copy of every record so far, in insertion order.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Distribution statistics for one latency series, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_ms: f64,
    /// Population standard deviation.
    pub stddev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Compute statistics over `samples`. Empty input yields all zeros.
    pub fn from_durations(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
        histogram.auto(true);

        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for sample in samples {
            let _ = histogram.record(sample.as_micros() as u64);
            let ms = as_millis_f64(*sample);
            sum += ms;
            min = min.min(ms);
            max = max.max(ms);
        }

        let count = samples.len() as f64;
        let mean = sum / count;
        let variance = samples
            .iter()
            .map(|s| {
                let diff = as_millis_f64(*s) - mean;
                diff * diff
            })
            .sum::<f64>()
            / count;

        let quantile_ms = |q: f64| histogram.value_at_quantile(q) as f64 / 1000.0;

        Self {
            count: samples.len() as u64,
            mean_ms: mean,
            stddev_ms: variance.sqrt(),
            min_ms: min,
            max_ms: max,
            p50_ms: quantile_ms(0.50),
            p95_ms: quantile_ms(0.95),
            p99_ms: quantile_ms(0.99),
        }
    }
}

fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Aggregate view of a run's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Requests force-terminated during drain (also counted in `failures`).
    pub aborted: u64,
    /// Fraction of requests that failed (0.0..=1.0).
    pub error_rate: f64,
    /// Failure counts keyed by [`RequestError::error_category`].
    pub error_categories: BTreeMap<String, u64>,
    /// Counts keyed by [`RequestRecord::status_label`].
    pub status_codes: BTreeMap<String, u64>,
    /// Client-side latency over all records.
    pub request_latency: LatencyStats,
    /// Server-reported latency over successful records.
    pub prediction_latency: LatencyStats,
}

impl MetricsSummary {
    pub fn from_records(records: &[RequestRecord]) -> Self {
        let mut summary = Self {
            total_requests: records.len() as u64,
            ..Self::default()
        };

        let mut request_latencies = Vec::with_capacity(records.len());
        let mut prediction_latencies = Vec::with_capacity(records.len());

        for record in records {
            request_latencies.push(record.request_latency);
            *summary
                .status_codes
                .entry(record.status_label())
                .or_insert(0) += 1;

            if record.success {
                summary.successes += 1;
                prediction_latencies.push(record.prediction_latency);
            } else {
                summary.failures += 1;
                if let Some(category) = record.error_category() {
                    *summary
                        .error_categories
                        .entry(category.to_owned())
                        .or_insert(0) += 1;
                }
                if matches!(record.error, Some(RequestError::Aborted)) {
                    summary.aborted += 1;
                }
            }
        }

        if summary.total_requests > 0 {
            summary.error_rate = summary.failures as f64 / summary.total_requests as f64;
        }
        summary.request_latency = LatencyStats::from_durations(&request_latencies);
        summary.prediction_latency = LatencyStats::from_durations(&prediction_latencies);
        summary
    }

    /// Requests per second over `elapsed`. Zero for an empty interval.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_requests as f64 / secs
    }
}
