use std::fmt::Write as _;

use stampede_core::metrics::DATA_RECEIVED;
use stampede_core::{RunReport, Verdict};
use stampede_metrics::{MetricSeriesSummary, MetricValue};

use super::format::*;

const PASS: &str = "✓";
const FAIL: &str = "✗";

pub(crate) fn render(name: &str, report: &RunReport) -> String {
    let mut out = String::new();

    writeln!(&mut out, "summary: {name}").ok();
    writeln!(&mut out, "  status: {}", report.status).ok();
    if let Some(reason) = &report.abort_reason {
        writeln!(&mut out, "  aborted: {reason}").ok();
    }
    writeln!(&mut out, "  duration: {}", format_duration(report.duration)).ok();
    writeln!(
        &mut out,
        "  iterations: {} (vus_max {}, forced stops {})",
        report.iterations, report.vus_max, report.forced_stops
    )
    .ok();
    out.push('\n');

    if !report.checks.is_empty() {
        out.push_str("checks\n");
        for c in &report.checks {
            let total = c.passes.saturating_add(c.fails);
            let mark = if c.fails == 0 { PASS } else { FAIL };
            let rate = (total > 0).then(|| c.passes as f64 / total as f64);
            writeln!(
                &mut out,
                "  {mark} {}: {}/{} ({})",
                c.name,
                c.passes,
                total,
                format_pct(rate)
            )
            .ok();
        }
        out.push('\n');
    }

    if !report.metrics.is_empty() {
        out.push_str("metrics\n");
        let width = report
            .metrics
            .iter()
            .map(|m| m.name.len())
            .max()
            .unwrap_or(0);
        for m in &report.metrics {
            writeln!(&mut out, "  {:.<width$}.. {}", m.name, metric_line(m)).ok();
        }
        out.push('\n');
    }

    if !report.thresholds.is_empty() {
        out.push_str("thresholds\n");
        for t in &report.thresholds {
            let mark = if t.verdict.is_pass() { PASS } else { FAIL };
            let observed = match t.verdict {
                Verdict::NoData => "no data".to_string(),
                Verdict::Pass | Verdict::Fail { .. } => {
                    format!("observed {}", format_observed(t.observed))
                }
            };
            writeln!(
                &mut out,
                "  {mark} {}: {} ({observed})",
                t.metric, t.expression
            )
            .ok();
        }
        out.push('\n');
    }

    out
}

fn metric_line(m: &MetricSeriesSummary) -> String {
    match &m.values {
        MetricValue::Counter(n) if m.name == DATA_RECEIVED => format_bytes(*n),
        MetricValue::Counter(n) => n.to_string(),
        MetricValue::Gauge(v) => v.to_string(),
        MetricValue::Rate { total, hits, rate } => {
            format!("{} ({hits}/{total})", format_pct(*rate))
        }
        MetricValue::Histogram(h) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} (n={})",
            format_ms(h.mean),
            format_ms(h.min),
            format_ms(h.p50),
            format_ms(h.max),
            format_ms(h.p90),
            format_ms(h.p95),
            format_ms(h.p99),
            h.count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stampede_core::{CheckSummary, RunStatus, ThresholdResult};
    use stampede_metrics::{HistogramSummary, MetricKind};

    fn report() -> RunReport {
        RunReport {
            status: RunStatus::Failed,
            abort_reason: None,
            duration: Duration::from_secs(300),
            iterations: 120,
            vu_iterations: 120,
            vus_spawned: 10,
            vus_max: 10,
            forced_stops: 0,
            thresholds: vec![
                ThresholdResult {
                    metric: "http_req_duration".to_string(),
                    expression: "p(95)<500".to_string(),
                    abort_on_fail: false,
                    observed: Some(120.5),
                    verdict: Verdict::Pass,
                },
                ThresholdResult {
                    metric: "http_req_failed".to_string(),
                    expression: "rate<0.01".to_string(),
                    abort_on_fail: true,
                    observed: Some(0.025),
                    verdict: Verdict::Fail { observed: 0.025 },
                },
            ],
            checks: vec![CheckSummary {
                name: "status is 200".to_string(),
                passes: 117,
                fails: 3,
            }],
            metrics: vec![
                MetricSeriesSummary {
                    name: "data_received".to_string(),
                    kind: MetricKind::Counter,
                    tags: Vec::new(),
                    values: MetricValue::Counter(2048),
                },
                MetricSeriesSummary {
                    name: "http_req_duration".to_string(),
                    kind: MetricKind::Histogram,
                    tags: Vec::new(),
                    values: MetricValue::Histogram(HistogramSummary {
                        count: 120,
                        sum: 6_000.0,
                        min: Some(10.0),
                        max: Some(900.0),
                        mean: Some(50.0),
                        stdev: Some(5.0),
                        p50: Some(45.0),
                        p90: Some(100.0),
                        p95: Some(120.5),
                        p99: Some(800.0),
                    }),
                },
            ],
            teardown_error: None,
        }
    }

    #[test]
    fn renders_every_section() {
        let out = render("load-test", &report());

        assert!(out.starts_with("summary: load-test\n  status: failed\n"));
        assert!(out.contains("  duration: 300s\n"));
        assert!(out.contains("  ✗ status is 200: 117/120 (97.50%)\n"));
        assert!(out.contains("data_received...... 2.00KiB\n"));
        assert!(out.contains("med=45.00ms"));
        assert!(out.contains("  ✓ http_req_duration: p(95)<500 (observed 120.5000)\n"));
        assert!(out.contains("  ✗ http_req_failed: rate<0.01 (observed 0.0250)\n"));
    }
}
