use std::time::Duration;

use stampede_metrics::{MetricKind, MetricSnapshot, Registry};

use crate::config::ThresholdConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

impl ThresholdAgg {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Histogram => !matches!(self, Self::Rate),
            MetricKind::Rate => matches!(self, Self::Rate | Self::Count),
            MetricKind::Counter => matches!(self, Self::Count),
            MetricKind::Gauge => matches!(self, Self::Avg | Self::Min | Self::Max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::NotEq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("missing comparison operator in `{raw}`"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("expected `<aggregation> <op> <number>`, got `{raw}`"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: f64 = inner
            .parse()
            .map_err(|_| format!("invalid percentile `{inner}`"))?;
        if !(p > 0.0 && p <= 100.0) {
            return Err(format!("percentile {p} out of range (0, 100]"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}`"));
    };

    let value: f64 = right
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| format!("invalid numeric value `{right}`"))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// Splits `name{key:value,...}` into the metric name and its tag selector.
fn parse_metric_selector(raw: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some((name, rest)) = raw.split_once('{') else {
        return Ok((raw.to_string(), Vec::new()));
    };
    let body = rest
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag selector in `{raw}`"))?;

    let mut tags = Vec::new();
    for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
        let (k, v) = pair
            .split_once(':')
            .ok_or_else(|| format!("tag selector `{pair}` must be `key:value`"))?;
        tags.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok((name.trim().to_string(), tags))
}

/// A validated threshold, ready for repeated evaluation.
#[derive(Debug, Clone)]
pub struct Threshold {
    /// Metric name as configured, selector included.
    pub metric: String,
    pub expression: String,
    pub abort_on_fail: bool,
    pub abort_grace: Option<Duration>,
    name: String,
    tags: Vec<(String, String)>,
    expr: ThresholdExpr,
}

impl Threshold {
    pub fn parse(cfg: &ThresholdConfig) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidThreshold {
            metric: cfg.metric.clone(),
            expression: cfg.expression.clone(),
            reason,
        };

        let (name, tags) = parse_metric_selector(&cfg.metric).map_err(invalid)?;
        if name.is_empty() {
            return Err(invalid("missing metric name".to_string()));
        }
        let expr = parse_threshold_expr(&cfg.expression).map_err(invalid)?;

        Ok(Self {
            metric: cfg.metric.clone(),
            expression: cfg.expression.clone(),
            abort_on_fail: cfg.abort_on_fail,
            abort_grace: cfg.abort_grace,
            name,
            tags,
            expr,
        })
    }

    /// Like [`Threshold::parse`], also rejecting aggregations that make no sense for
    /// the metric's registered kind (e.g. `rate` on a histogram).
    pub fn parse_for(cfg: &ThresholdConfig, registry: &Registry) -> Result<Self> {
        let threshold = Self::parse(cfg)?;
        if let Some((_, kind)) = registry.lookup_metric(&threshold.name)
            && !threshold.expr.agg.applies_to(kind)
        {
            return Err(Error::InvalidThreshold {
                metric: cfg.metric.clone(),
                expression: cfg.expression.clone(),
                reason: format!("aggregation not supported for {kind} metrics"),
            });
        }
        Ok(threshold)
    }

    pub fn expr(&self) -> &ThresholdExpr {
        &self.expr
    }

    /// Whether a failure at `elapsed` may stop the run.
    pub fn may_abort_at(&self, elapsed: Duration) -> bool {
        self.abort_on_fail && self.abort_grace.is_none_or(|grace| elapsed >= grace)
    }

    fn snapshot(&self, registry: &Registry) -> Option<MetricSnapshot> {
        let (id, _) = registry.lookup_metric(&self.name)?;
        let query = self
            .tags
            .iter()
            .fold(registry.query(id), |q, (k, v)| q.where_eq(k, v));
        Some(query.merge())
    }

    pub fn evaluate(&self, registry: &Registry) -> ThresholdResult {
        let observed = self
            .snapshot(registry)
            .and_then(|s| observed_value(&s, &self.expr.agg));

        let verdict = match observed {
            None => Verdict::NoData,
            Some(v) if compare(v, self.expr.op, self.expr.value) => Verdict::Pass,
            Some(v) => Verdict::Fail { observed: v },
        };

        ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            abort_on_fail: self.abort_on_fail,
            observed,
            verdict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Pass,
    Fail { observed: f64 },
    /// The metric has no samples yet.
    NoData,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub abort_on_fail: bool,
    pub observed: Option<f64>,
    pub verdict: Verdict,
}

pub fn parse_thresholds(configs: &[ThresholdConfig], registry: &Registry) -> Result<Vec<Threshold>> {
    configs
        .iter()
        .map(|cfg| Threshold::parse_for(cfg, registry))
        .collect()
}

/// Read-only: evaluating twice without new samples yields identical results.
pub fn evaluate_thresholds(thresholds: &[Threshold], registry: &Registry) -> Vec<ThresholdResult> {
    thresholds.iter().map(|t| t.evaluate(registry)).collect()
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
        ThresholdOp::NotEq => left != right,
    }
}

fn observed_value(snapshot: &MetricSnapshot, agg: &ThresholdAgg) -> Option<f64> {
    match (snapshot, agg) {
        (MetricSnapshot::Histogram(h), ThresholdAgg::Count) => Some(h.count() as f64),
        (MetricSnapshot::Histogram(h), ThresholdAgg::Avg) => h.mean(),
        (MetricSnapshot::Histogram(h), ThresholdAgg::Min) => h.min(),
        (MetricSnapshot::Histogram(h), ThresholdAgg::Max) => h.max(),
        (MetricSnapshot::Histogram(h), ThresholdAgg::Med) => h.percentile(50.0),
        (MetricSnapshot::Histogram(h), ThresholdAgg::P(p)) => h.percentile(*p),

        (MetricSnapshot::Rate(r), ThresholdAgg::Rate) => r.has_data().then(|| r.rate()),
        (MetricSnapshot::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),

        (MetricSnapshot::Counter(v), ThresholdAgg::Count) => Some(*v as f64),

        (
            MetricSnapshot::Gauge(v),
            ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max,
        ) => Some(*v as f64),

        (_, _) => None,
    }
}
