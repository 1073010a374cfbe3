//! k6-style terminal summary for a finished run.
//!
//! [`render_summary`] is a pure function from a [`LoadTestResult`] to a
//! string. Colors come from `colored` and follow its global override, so
//! `--no-color` or a piped stdout yields plain text.

use colored::Colorize;

use crate::loadtest::config::RunConfig;
use crate::loadtest::engine::{LoadTestResult, RunStatus};
use crate::loadtest::metrics::LatencyStats;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 32;

/// Latency above which p99 is highlighted.
const SLOW_P99_MS: f64 = 1000.0;

/// Render the run summary.
///
/// ```text
///           /\      |  inference-loadgen
///          /  \     |
///     /\  /    \    |  target:     https://runtime.sagemaker.../invocations
///    /  \/      \   |  shape:      constant (peak 40 users)
///   /    \       \  |  time limit: 300s
///  /      \       \ |  think time: 1ms..30000ms
///
///   request_latency.............: avg=212.4ms  std=40.1ms  min=150.2ms  max=901.0ms
///   request_latency_pct.........: p50=205.1ms  p95=290.3ms  p99=480.9ms
///   prediction_latency..........: avg=120.0ms  ...
///   requests_total..............: 2400
///   ...
/// ```
pub fn render_summary(result: &LoadTestResult, config: &RunConfig) -> String {
    let summary = &result.summary;
    let mut lines = Vec::new();

    lines.push(render_header(config));

    lines.push(format_metric_row(
        "request_latency",
        &format_distribution(&summary.request_latency),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "request_latency_pct",
        &format_percentiles(&summary.request_latency),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "prediction_latency",
        &format_distribution(&summary.prediction_latency),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "prediction_latency_pct",
        &format_percentiles(&summary.prediction_latency),
        PAD_WIDTH,
    ));

    lines.push(format_metric_row(
        "requests_total",
        &summary.total_requests.to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "requests_succeeded",
        &summary.successes.to_string().green().to_string(),
        PAD_WIDTH,
    ));
    let failed = if summary.failures > 0 {
        summary.failures.to_string().red().to_string()
    } else {
        summary.failures.to_string()
    };
    lines.push(format_metric_row("requests_failed", &failed, PAD_WIDTH));

    let error_rate_pct = summary.error_rate * 100.0;
    let error_rate_str = format!("{error_rate_pct:.1}%");
    let error_rate_colored = if error_rate_pct > 5.0 {
        error_rate_str.red().to_string()
    } else if error_rate_pct > 1.0 {
        error_rate_str.yellow().to_string()
    } else {
        error_rate_str.green().to_string()
    };
    lines.push(format_metric_row("error_rate", &error_rate_colored, PAD_WIDTH));

    lines.push(format_metric_row(
        "throughput",
        &format!("{:.2} req/s", summary.throughput(result.elapsed))
            .green()
            .to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", result.elapsed.as_secs_f64()),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row("ticks", &result.ticks.to_string(), PAD_WIDTH));

    let status = match result.status {
        RunStatus::Completed => "completed".green().to_string(),
        RunStatus::Stopped => "stopped early".yellow().to_string(),
    };
    lines.push(format_metric_row("status", &status, PAD_WIDTH));

    if result.aborted_users > 0 {
        lines.push(format_metric_row(
            "aborted_users",
            &result.aborted_users.to_string().red().to_string(),
            PAD_WIDTH,
        ));
    }

    if !summary.error_categories.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut categories: Vec<_> = summary.error_categories.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("    {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    if !summary.status_codes.is_empty() {
        lines.push(String::new());
        lines.push("  status codes:".to_string());
        for (code, count) in &summary.status_codes {
            lines.push(format_metric_row(
                &format!("    {code}"),
                &count.to_string(),
                PAD_WIDTH,
            ));
        }
    }

    lines.join("\n")
}

fn render_header(config: &RunConfig) -> String {
    let (shape_name, peak, time_limit) = match config.shape.build() {
        Ok(shape) => (
            shape.name().to_string(),
            shape.peak_users().to_string(),
            format!("{}s", shape.time_limit().as_secs()),
        ),
        Err(_) => ("invalid".to_string(), "?".to_string(), "?".to_string()),
    };
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:     {}
   /  \/      \   |  shape:      {} (peak {} users)
  /    \       \  |  time limit: {}
 /      \       \ |  think time: {}ms..{}ms
"#,
        "inference-loadgen".bold(),
        config.endpoint,
        shape_name,
        peak,
        time_limit,
        config.think_time.min.as_millis(),
        config.think_time.max.as_millis(),
    )
}

fn format_distribution(stats: &LatencyStats) -> String {
    format!(
        "avg={:.1}ms  std={:.1}ms  min={:.1}ms  max={:.1}ms",
        stats.mean_ms, stats.stddev_ms, stats.min_ms, stats.max_ms
    )
}

fn format_percentiles(stats: &LatencyStats) -> String {
    let value = format!(
        "p50={:.1}ms  p95={:.1}ms  p99={:.1}ms",
        stats.p50_ms, stats.p95_ms, stats.p99_ms
    );
    if stats.p99_ms < SLOW_P99_MS {
        value.green().to_string()
    } else {
        value.yellow().to_string()
    }
}

/// `"  metric_name..........: value"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::engine::PopulationSample;
    use crate::loadtest::error::RequestError;
    use crate::loadtest::metrics::{MetricsSummary, RequestRecord};
    use crate::loadtest::shape::ShapeConfig;
    use crate::loadtest::signer::Credentials;
    use crate::loadtest::target::InvokeResponse;
    use chrono::Utc;
    use std::time::Duration;
    use url::Url;

    /// Disable colors in tests for deterministic assertions.
    fn setup_no_color() {
        colored::control::set_override(false);
    }

    fn config() -> RunConfig {
        RunConfig::new(
            Url::parse("http://localhost:8080/invocations").unwrap(),
            bytes::Bytes::from_static(b"x"),
            ShapeConfig::Spike {
                time_limit_secs: 300,
                spike_duration_secs: 5,
                pattern_duration_secs: 20,
                normal_users: 20,
                spike_users: 40,
            },
            Credentials::new("AKID", "secret"),
        )
    }

    fn result(status: RunStatus, with_errors: bool) -> LoadTestResult {
        let now = Utc::now();
        let mut records = vec![RequestRecord::success(
            now,
            Duration::from_millis(200),
            &InvokeResponse {
                status: 200,
                prediction_latency: Duration::from_millis(80),
            },
        )];
        if with_errors {
            records.push(RequestRecord::failure(now, Duration::from_secs(30), RequestError::Timeout));
            records.push(RequestRecord::aborted(now, Duration::from_secs(2)));
        }
        LoadTestResult {
            summary: MetricsSummary::from_records(&records),
            records,
            elapsed: Duration::from_secs(10),
            ticks: 11,
            status,
            drain_started_at: Duration::from_secs(10),
            aborted_users: u32::from(with_errors),
            timeline: vec![PopulationSample {
                tick: 0,
                elapsed: Duration::ZERO,
                target: 40,
                active: 40,
            }],
        }
    }

    #[test]
    fn test_header_contains_configuration() {
        setup_no_color();
        let output = render_summary(&result(RunStatus::Completed, false), &config());
        assert!(output.contains("inference-loadgen"));
        assert!(output.contains("http://localhost:8080/invocations"));
        assert!(output.contains("spike (peak 40 users)"));
        assert!(output.contains("time limit: 300s"));
        assert!(output.contains("think time: 1ms..30000ms"));
    }

    #[test]
    fn test_metric_rows() {
        setup_no_color();
        let output = render_summary(&result(RunStatus::Completed, false), &config());
        assert!(output.contains("requests_total"));
        assert!(output.contains("avg=200.0ms"));
        assert!(output.contains("0.10 req/s"));
        assert!(output.contains("completed"));
        assert!(!output.contains("errors:"));
        assert!(!output.contains("aborted_users"));
    }

    #[test]
    fn test_error_breakdown_and_stopped_status() {
        setup_no_color();
        let output = render_summary(&result(RunStatus::Stopped, true), &config());
        assert!(output.contains("stopped early"));
        assert!(output.contains("errors:"));
        assert!(output.contains("timeout"));
        assert!(output.contains("aborted_users"));
        assert!(output.contains("status codes:"));
        assert!(output.contains("66.7%"));
    }

    #[test]
    fn test_format_metric_row_padding() {
        let row = format_metric_row("ticks", "301", 10);
        assert_eq!(row, "  ticks.....: 301");
    }
}
