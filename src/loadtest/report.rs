//! Run output: the JSON report and the per-request CSV export.
//!
//! The JSON report is schema-versioned and self-contained. It embeds the
//! resolved run configuration (never the credentials), the shape, the
//! aggregate metrics and the population timeline.
//!
//! The CSV export has one row per [`RequestRecord`] for offline analysis.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::loadtest::config::{RunConfig, CONFIG_DIR};
use crate::loadtest::engine::{LoadTestResult, PopulationSample, RunStatus};
use crate::loadtest::metrics::{MetricsSummary, RequestRecord};
use crate::loadtest::shape::ShapeConfig;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.0";

/// Header row of the CSV export.
pub const CSV_HEADER: &str = "timestamp,requestLatency,predictionLatency,success,statusCode";

/// Top-level JSON report.
#[derive(Debug, Serialize)]
pub struct LoadTestReport {
    pub schema_version: String,
    /// When the report was generated (RFC 3339).
    pub timestamp: String,
    pub status: RunStatus,
    /// Run start to end of drain.
    pub duration_secs: f64,
    pub ticks: u64,
    pub drain_started_at_secs: f64,
    pub aborted_users: u32,
    /// Requests per second over the whole run.
    pub throughput_rps: f64,
    pub config: ReportConfig,
    pub metrics: MetricsSummary,
    pub timeline: Vec<PopulationSample>,
}

/// Resolved configuration embedded in the report. Holds no secrets.
#[derive(Debug, Serialize)]
pub struct ReportConfig {
    pub endpoint: String,
    pub region: String,
    pub service: String,
    pub content_type: String,
    pub payload_path: String,
    pub payload_bytes: usize,
    pub timeout_ms: u64,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub tick_interval_ms: u64,
    pub drain_timeout_secs: u64,
    pub shape: ShapeConfig,
}

impl ReportConfig {
    fn from_run_config(config: &RunConfig) -> Self {
        Self {
            endpoint: config.endpoint.to_string(),
            region: config.region.clone(),
            service: config.service.clone(),
            content_type: config.content_type.clone(),
            payload_path: config.payload_path.display().to_string(),
            payload_bytes: config.payload.len(),
            timeout_ms: config.timeout.as_millis() as u64,
            min_wait_ms: config.think_time.min.as_millis() as u64,
            max_wait_ms: config.think_time.max.as_millis() as u64,
            tick_interval_ms: config.tick_interval.as_millis() as u64,
            drain_timeout_secs: config.drain_timeout.as_secs(),
            shape: config.shape.clone(),
        }
    }
}

impl LoadTestReport {
    pub fn from_result(result: &LoadTestResult, config: &RunConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            status: result.status,
            duration_secs: result.elapsed.as_secs_f64(),
            ticks: result.ticks,
            drain_started_at_secs: result.drain_started_at.as_secs_f64(),
            aborted_users: result.aborted_users,
            throughput_rps: result.summary.throughput(result.elapsed),
            config: ReportConfig::from_run_config(config),
            metrics: result.summary.clone(),
            timeline: result.timeline.clone(),
        }
    }
}

/// Write `report` to `<base_dir>/.loadgen/reports/loadtest-<timestamp>.json`.
///
/// Creates the reports directory if needed and returns the file path.
pub fn write_report(report: &LoadTestReport, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
    let reports_dir = base_dir.join(CONFIG_DIR).join("reports");
    if !reports_dir.exists() {
        std::fs::create_dir_all(&reports_dir)?;
    }

    let report_path = reports_dir.join(report_filename(&Utc::now()));
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(&report_path, json)?;

    Ok(report_path)
}

/// Report filename for `timestamp`, with hyphens instead of colons.
pub fn report_filename(timestamp: &DateTime<Utc>) -> String {
    format!("loadtest-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

/// Write `records` as CSV rows under [`CSV_HEADER`].
///
/// Latencies are in seconds. `statusCode` is the HTTP status, or the error
/// category when no status was received.
pub fn write_csv<W: Write>(records: &[RequestRecord], writer: W) -> Result<(), std::io::Error> {
    let mut out = BufWriter::new(writer);
    writeln!(out, "{CSV_HEADER}")?;
    for record in records {
        writeln!(
            out,
            "{},{:.6},{:.6},{},{}",
            record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            record.request_latency.as_secs_f64(),
            record.prediction_latency.as_secs_f64(),
            record.success,
            record.status_label()
        )?;
    }
    out.flush()
}

/// [`write_csv`] into a new file at `path`, creating parent directories.
pub fn write_csv_file(records: &[RequestRecord], path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_csv(records, std::fs::File::create(path)?)
}
