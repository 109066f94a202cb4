use std::fmt;

use loadgate_metrics::{MetricKind, SeriesSnapshot, Snapshot};

use super::error::{Error, Result};
use super::sink;

/// Threshold expressions declared against one metric selector.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    /// `name` or `name{tag:value,...}`.
    pub metric: String,
    pub expressions: Vec<String>,
    /// Stop the run as soon as one of these expressions is violated.
    pub abort_on_fail: bool,
}

impl ThresholdSet {
    pub fn new<I, S>(metric: impl Into<String>, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
            abort_on_fail: false,
        }
    }

    #[must_use]
    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub name: String,
    /// Sorted by key.
    pub tags: Vec<(String, String)>,
}

impl MetricSelector {
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let raw = raw.trim();
        let (name, tags) = match raw.split_once('{') {
            None => (raw, None),
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix('}')
                    .ok_or_else(|| format!("unterminated tag selector in `{raw}`"))?;
                (name.trim(), Some(inner))
            }
        };

        if name.is_empty() {
            return Err(format!("missing metric name in `{raw}`"));
        }

        let mut out = Vec::new();
        for pair in tags.into_iter().flat_map(|t| t.split(',')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair
                .split_once(':')
                .ok_or_else(|| format!("tag `{pair}` must be `key:value`"))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                return Err(format!("empty tag key in `{raw}`"));
            }
            out.push((k.to_string(), v.to_string()));
        }
        out.sort();
        out.dedup_by(|a, b| a.0 == b.0);

        Ok(Self {
            name: name.to_string(),
            tags: out,
        })
    }

    fn resolve<'s>(&self, snapshot: &'s Snapshot) -> Option<&'s SeriesSnapshot> {
        let tags: Vec<(&str, &str)> = self
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        snapshot.find(&self.name, &tags)
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.tags.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

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
    Ne,
}

impl ThresholdOp {
    fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < bound,
            ThresholdOp::Lte => observed <= bound,
            ThresholdOp::Gt => observed > bound,
            ThresholdOp::Gte => observed >= bound,
            ThresholdOp::Eq => observed == bound,
            ThresholdOp::Ne => observed != bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl ThresholdAgg {
    /// Whether this aggregation yields a value for series of `kind`.
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, ThresholdAgg::Count | ThresholdAgg::Value),
            MetricKind::Gauge => matches!(
                self,
                ThresholdAgg::Value | ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max
            ),
            MetricKind::Rate => matches!(self, ThresholdAgg::Rate | ThresholdAgg::Count),
            MetricKind::Histogram => !matches!(self, ThresholdAgg::Rate | ThresholdAgg::Value),
        }
    }
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdAgg::Avg => f.write_str("avg"),
            ThresholdAgg::Min => f.write_str("min"),
            ThresholdAgg::Max => f.write_str("max"),
            ThresholdAgg::Med => f.write_str("med"),
            ThresholdAgg::Count => f.write_str("count"),
            ThresholdAgg::Rate => f.write_str("rate"),
            ThresholdAgg::Value => f.write_str("value"),
            ThresholdAgg::P(p) => write!(f, "p({p})"),
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
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}` in threshold: {raw}"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// One parsed threshold expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub selector: MetricSelector,
    /// Expression as declared.
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

pub fn compile_thresholds(sets: &[ThresholdSet]) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for set in sets {
        let invalid = |error: String| Error::InvalidThreshold {
            metric: set.metric.clone(),
            error,
        };
        let selector = MetricSelector::parse(&set.metric).map_err(invalid)?;
        if set.expressions.is_empty() {
            return Err(invalid("no expressions".to_string()));
        }
        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(invalid)?;
            // Names outside the catalogue are checked against whatever series they resolve to.
            if let Some(kind) = sink::metric_kind(&selector.name)
                && !expr.agg.applies_to(kind)
            {
                return Err(invalid(format!(
                    "`{}` does not apply to {kind} metric `{}`",
                    expr.agg, selector.name
                )));
            }
            out.push(Threshold {
                selector: selector.clone(),
                source: raw.trim().to_string(),
                expr,
                abort_on_fail: set.abort_on_fail,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdOutcome {
    Satisfied,
    Violated,
    /// The selector did not resolve to a value.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub outcome: ThresholdOutcome,
    pub observed: Option<f64>,
    pub bound: f64,
}

impl ThresholdResult {
    pub fn passed(&self) -> bool {
        self.outcome == ThresholdOutcome::Satisfied
    }
}

/// Pure function of `snapshot`: evaluating twice yields identical results.
pub fn evaluate_thresholds(thresholds: &[Threshold], snapshot: &Snapshot) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|t| evaluate_one(t, snapshot))
        .collect()
}

pub(crate) fn evaluate_one(threshold: &Threshold, snapshot: &Snapshot) -> ThresholdResult {
    let observed = threshold
        .selector
        .resolve(snapshot)
        .and_then(|series| observed_value(series, threshold.expr.agg));

    let outcome = match observed {
        None => ThresholdOutcome::Inconclusive,
        Some(v) if threshold.expr.op.compare(v, threshold.expr.value) => {
            ThresholdOutcome::Satisfied
        }
        Some(_) => ThresholdOutcome::Violated,
    };

    ThresholdResult {
        metric: threshold.selector.to_string(),
        expression: threshold.source.clone(),
        outcome,
        observed,
        bound: threshold.expr.value,
    }
}

fn observed_value(series: &SeriesSnapshot, agg: ThresholdAgg) -> Option<f64> {
    if !agg.applies_to(series.kind) {
        return None;
    }
    match series.kind {
        MetricKind::Counter => match agg {
            ThresholdAgg::Count | ThresholdAgg::Value => series.counter().map(|v| v as f64),
            _ => None,
        },
        MetricKind::Gauge => match (agg, series.summary()) {
            (
                ThresholdAgg::Value | ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max,
                loadgate_metrics::MetricValue::Gauge(v),
            ) => Some(v as f64),
            _ => None,
        },
        MetricKind::Rate => {
            let (total, hits) = series.rate()?;
            match agg {
                ThresholdAgg::Rate => (total > 0).then(|| hits as f64 / total as f64),
                ThresholdAgg::Count => Some(total as f64),
                _ => None,
            }
        }
        MetricKind::Histogram => {
            let h = series.histogram()?;
            if agg == ThresholdAgg::Count {
                return Some(h.len() as f64);
            }
            if h.is_empty() {
                return None;
            }
            let unit = series.unit;
            match agg {
                ThresholdAgg::Avg => Some(unit.to_reported(h.mean())),
                ThresholdAgg::Min => Some(unit.to_reported(h.min() as f64)),
                ThresholdAgg::Max => Some(unit.to_reported(h.max() as f64)),
                ThresholdAgg::Med => series.percentile(50.0),
                ThresholdAgg::P(p) => series.percentile(p),
                _ => None,
            }
        }
    }
}
