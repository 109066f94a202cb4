use std::sync::Arc;

use hdrhistogram::Histogram;

use crate::metrics::{MetricKind, MetricSeriesSummary, MetricValue, SeriesValue, Unit};

/// One series as of a [`Snapshot`]. Tags are sorted by key.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: Arc<str>,
    pub tags: Vec<(Arc<str>, Arc<str>)>,
    pub kind: MetricKind,
    pub unit: Unit,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }

    fn tags_match(&self, tags: &[(&str, &str)]) -> bool {
        self.tags.len() == tags.len() && tags.iter().all(|(k, v)| self.tag(k) == Some(*v))
    }

    pub fn summary(&self) -> MetricValue {
        self.value.summarize(self.unit)
    }

    pub fn counter(&self) -> Option<u64> {
        match &self.value {
            SeriesValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// `(total, hits)` of a rate series.
    pub fn rate(&self) -> Option<(u64, u64)> {
        match &self.value {
            SeriesValue::Rate { total, hits } => Some((*total, *hits)),
            _ => None,
        }
    }

    pub fn histogram(&self) -> Option<&Histogram<u64>> {
        match &self.value {
            SeriesValue::Histogram(h) => Some(h),
            _ => None,
        }
    }

    /// Percentile (`0..=100`) of a histogram series in reported units, `None` when empty.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        let h = self.histogram()?;
        if h.is_empty() {
            return None;
        }
        let q = (pct / 100.0).clamp(0.0, 1.0);
        Some(self.unit.to_reported(h.value_at_quantile(q) as f64))
    }

    pub fn to_summary(&self) -> MetricSeriesSummary {
        MetricSeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            unit: self.unit,
            tags: self
                .tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            values: self.summary(),
        }
    }
}

/// Point-in-time copy of every registered series, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: Vec<SeriesSnapshot>,
}

impl Snapshot {
    pub(crate) fn new(series: Vec<SeriesSnapshot>) -> Self {
        Self { series }
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    pub fn find(&self, name: &str, tags: &[(&str, &str)]) -> Option<&SeriesSnapshot> {
        self.series
            .iter()
            .find(|s| s.name.as_ref() == name && s.tags_match(tags))
    }

    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Option<u64> {
        self.find(name, tags).and_then(SeriesSnapshot::counter)
    }

    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        self.series.iter().map(SeriesSnapshot::to_summary).collect()
    }
}
