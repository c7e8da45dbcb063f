use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

use stampede_core::{ProgressFn, ProgressUpdate, RunReport, Verdict};
use stampede_metrics::{MetricSeriesSummary, MetricValue};

use super::{OutputFormatter, RunPlan};

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan: &RunPlan<'_>) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u: ProgressUpdate| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, name: &str, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(name, report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: usize,
    pub stages: usize,
    pub target_vus: u64,
    pub active_vus: u64,
    pub iterations: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.index + 1,
        stages: u.stage.count,
        target_vus: u.target_vus,
        active_vus: u.active_vus,
        iterations: u.iterations,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub duration_secs: f64,
    pub iterations: u64,
    pub vus_max: u64,
    pub forced_stops: u64,
    pub checks: Vec<JsonCheck>,
    pub thresholds: Vec<JsonThreshold>,
    pub metrics: Vec<JsonMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub verdict: &'static str,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    pub kind: String,
    #[serde(flatten)]
    pub values: JsonMetricValues,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonMetricValues {
    Counter {
        count: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        rate: Option<f64>,
        passes: u64,
        total: u64,
    },
    Histogram {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
        stdev: Option<f64>,
    },
}

fn metric_values(m: &MetricSeriesSummary) -> JsonMetricValues {
    match &m.values {
        MetricValue::Counter(count) => JsonMetricValues::Counter { count: *count },
        MetricValue::Gauge(value) => JsonMetricValues::Gauge { value: *value },
        MetricValue::Rate { total, hits, rate } => JsonMetricValues::Rate {
            rate: *rate,
            passes: *hits,
            total: *total,
        },
        MetricValue::Histogram(h) => JsonMetricValues::Histogram {
            count: h.count,
            avg: h.mean,
            min: h.min,
            med: h.p50,
            max: h.max,
            p90: h.p90,
            p95: h.p95,
            p99: h.p99,
            stdev: h.stdev,
        },
    }
}

fn verdict_name(v: Verdict) -> &'static str {
    match v {
        Verdict::Pass => "pass",
        Verdict::Fail { .. } => "fail",
        Verdict::NoData => "no_data",
    }
}

fn build_summary_line(name: &str, report: &RunReport) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        scenario: name.to_string(),
        status: report.status.to_string(),
        abort_reason: report.abort_reason.as_ref().map(ToString::to_string),
        duration_secs: report.duration.as_secs_f64(),
        iterations: report.iterations,
        vus_max: report.vus_max,
        forced_stops: report.forced_stops,
        checks: report
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        thresholds: report
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                verdict: verdict_name(t.verdict),
                observed: t.observed,
                abort_on_fail: t.abort_on_fail,
            })
            .collect(),
        metrics: report
            .metrics
            .iter()
            .map(|m| JsonMetric {
                name: m.name.clone(),
                kind: m.kind.to_string(),
                values: metric_values(m),
            })
            .collect(),
        teardown_error: report.teardown_error.clone(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use stampede_core::{AbortReason, RunStatus, StageSnapshot, ThresholdResult};
    use stampede_metrics::MetricKind;
    use std::time::Duration;

    #[test]
    fn progress_line_has_kind() {
        let update = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_millis(2_500),
            total_duration: Duration::from_secs(10),
            stage: StageSnapshot {
                index: 0,
                count: 2,
                stage_elapsed: Duration::from_millis(2_500),
                stage_remaining: Duration::from_millis(2_500),
                start_target: 0,
                end_target: 10,
                current_target: 5,
            },
            target_vus: 5,
            active_vus: 5,
            iterations: 42,
        };

        let v: Value = match serde_json::to_value(build_progress_line(&update)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("stage").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("elapsed_secs").and_then(Value::as_f64), Some(2.5));
        assert_eq!(v.get("iterations").and_then(Value::as_u64), Some(42));
    }

    #[test]
    fn summary_line_flattens_metric_values() {
        let report = RunReport {
            status: RunStatus::Aborted,
            abort_reason: Some(AbortReason::Cancelled),
            duration: Duration::from_secs(4),
            iterations: 7,
            vu_iterations: 7,
            vus_spawned: 2,
            vus_max: 2,
            forced_stops: 0,
            thresholds: vec![ThresholdResult {
                metric: "http_req_failed".to_string(),
                expression: "rate<0.01".to_string(),
                abort_on_fail: false,
                observed: None,
                verdict: Verdict::NoData,
            }],
            checks: Vec::new(),
            metrics: vec![
                MetricSeriesSummary {
                    name: "iterations".to_string(),
                    kind: MetricKind::Counter,
                    tags: Vec::new(),
                    values: MetricValue::Counter(7),
                },
                MetricSeriesSummary {
                    name: "iteration_failed".to_string(),
                    kind: MetricKind::Rate,
                    tags: Vec::new(),
                    values: MetricValue::Rate {
                        total: 7,
                        hits: 1,
                        rate: Some(1.0 / 7.0),
                    },
                },
            ],
            teardown_error: None,
        };

        let v: Value = match serde_json::to_value(build_summary_line("smoke", &report)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("status").and_then(Value::as_str), Some("aborted"));
        assert_eq!(
            v.get("abort_reason").and_then(Value::as_str),
            Some("run cancelled")
        );
        assert!(v.get("teardown_error").is_none());
        assert_eq!(
            v.pointer("/thresholds/0/verdict").and_then(Value::as_str),
            Some("no_data")
        );
        assert_eq!(
            v.pointer("/metrics/0/count").and_then(Value::as_u64),
            Some(7)
        );
        assert_eq!(
            v.pointer("/metrics/1/passes").and_then(Value::as_u64),
            Some(1)
        );
        assert_eq!(
            v.pointer("/metrics/1/kind").and_then(Value::as_str),
            Some("rate")
        );
    }
}
