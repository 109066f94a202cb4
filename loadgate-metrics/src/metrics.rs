use hdrhistogram::Histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Histogram,
}

/// Unit values are recorded in. Histograms of [`Unit::Micros`] are reported in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Unit {
    #[default]
    Count,
    Bytes,
    Micros,
}

impl Unit {
    #[must_use]
    pub fn to_reported(self, raw: f64) -> f64 {
        match self {
            Unit::Micros => raw / 1000.0,
            Unit::Count | Unit::Bytes => raw,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub unit: Unit,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Histogram(HistogramSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Latency in microseconds, up to one hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn summarize_histogram(h: &Histogram<u64>, unit: Unit) -> HistogramSummary {
    let count = h.len();
    let map_val = |v: u64| unit.to_reported(v as f64);

    HistogramSummary {
        p50: (count > 0).then(|| map_val(h.value_at_quantile(0.50))),
        p75: (count > 0).then(|| map_val(h.value_at_quantile(0.75))),
        p90: (count > 0).then(|| map_val(h.value_at_quantile(0.90))),
        p95: (count > 0).then(|| map_val(h.value_at_quantile(0.95))),
        p99: (count > 0).then(|| map_val(h.value_at_quantile(0.99))),
        min: (count > 0).then(|| map_val(h.min())),
        max: (count > 0).then(|| map_val(h.max())),
        mean: (count > 0).then(|| unit.to_reported(h.mean())),
        stdev: (count > 0).then(|| unit.to_reported(h.stdev())),
        count,
    }
}

/// Storage cell of one series inside one shard, and the merged value in a snapshot.
#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(u64),
    /// Sum of signed deltas, so shards merge by addition.
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
    },
    Histogram(Histogram<u64>),
}

impl SeriesValue {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => SeriesValue::Counter(0),
            MetricKind::Gauge => SeriesValue::Gauge(0),
            MetricKind::Rate => SeriesValue::Rate { total: 0, hits: 0 },
            MetricKind::Histogram => SeriesValue::Histogram(new_default_histogram()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesValue::Counter(_) => MetricKind::Counter,
            SeriesValue::Gauge(_) => MetricKind::Gauge,
            SeriesValue::Rate { .. } => MetricKind::Rate,
            SeriesValue::Histogram(_) => MetricKind::Histogram,
        }
    }

    pub(crate) fn merge_from(&mut self, other: &SeriesValue) {
        match (self, other) {
            (SeriesValue::Counter(a), SeriesValue::Counter(b)) => *a = a.saturating_add(*b),
            (SeriesValue::Gauge(a), SeriesValue::Gauge(b)) => *a = a.saturating_add(*b),
            (
                SeriesValue::Rate { total, hits },
                SeriesValue::Rate {
                    total: other_total,
                    hits: other_hits,
                },
            ) => {
                *total = total.saturating_add(*other_total);
                *hits = hits.saturating_add(*other_hits);
            }
            (SeriesValue::Histogram(a), SeriesValue::Histogram(b)) => {
                // Same bounds on both sides, so the add cannot go out of range.
                let _ = a.add(b);
            }
            _ => {}
        }
    }

    pub(crate) fn summarize(&self, unit: Unit) -> MetricValue {
        match self {
            SeriesValue::Counter(v) => MetricValue::Counter(*v),
            SeriesValue::Gauge(v) => MetricValue::Gauge(*v),
            SeriesValue::Rate { total, hits } => MetricValue::Rate {
                total: *total,
                hits: *hits,
                rate: (*total > 0).then(|| *hits as f64 / *total as f64),
            },
            SeriesValue::Histogram(h) => MetricValue::Histogram(summarize_histogram(h, unit)),
        }
    }
}
