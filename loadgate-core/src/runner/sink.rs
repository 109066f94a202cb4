use std::sync::Arc;
use std::time::Duration;

use loadgate_metrics::{
    HistogramSummary, MetricId, MetricKind, MetricValue, Registry, Snapshot, Unit,
};
use strum::IntoEnumIterator;

use super::sample::{Sample, SampleStatus};

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_ERRORS: &str = "http_req_errors";
pub const CHECKS: &str = "checks";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Kind of a built-in metric, `None` for names outside the catalogue.
pub(crate) fn metric_kind(name: &str) -> Option<MetricKind> {
    match name {
        ITERATIONS | HTTP_REQS | HTTP_REQ_ERRORS | DATA_RECEIVED | DATA_SENT => {
            Some(MetricKind::Counter)
        }
        ITERATION_DURATION | HTTP_REQ_DURATION => Some(MetricKind::Histogram),
        HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
        VUS | VUS_MAX => Some(MetricKind::Gauge),
        _ => None,
    }
}

/// Per-check pass/fail totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Concurrency-safe accumulator of samples.
///
/// Every sample is applied inside one [`Registry::record`] call, so a snapshot never sees
/// half of a sample.
#[derive(Debug)]
pub struct MetricSink {
    registry: Registry,
    iterations: MetricId,
    iteration_status: Vec<(SampleStatus, MetricId)>,
    iteration_duration: MetricId,
    http_reqs: MetricId,
    http_req_duration: MetricId,
    http_req_failed: MetricId,
    checks: MetricId,
    check_series: Vec<(Arc<str>, MetricId)>,
    data_received: MetricId,
    data_sent: MetricId,
    vus: MetricId,
    vus_max: MetricId,
}

impl MetricSink {
    pub fn new(check_names: &[Arc<str>]) -> Self {
        Self::with_registry(Registry::default(), check_names)
    }

    pub fn with_registry(registry: Registry, check_names: &[Arc<str>]) -> Self {
        let iterations = registry.register(ITERATIONS, MetricKind::Counter, Unit::Count);
        let iteration_status = SampleStatus::iter()
            .map(|status| {
                let tag = status.to_string();
                let id = registry.register_series(
                    ITERATIONS,
                    &[("status", tag.as_str())],
                    MetricKind::Counter,
                    Unit::Count,
                );
                (status, id)
            })
            .collect();
        let iteration_duration =
            registry.register(ITERATION_DURATION, MetricKind::Histogram, Unit::Micros);
        let http_reqs = registry.register(HTTP_REQS, MetricKind::Counter, Unit::Count);
        let http_req_duration =
            registry.register(HTTP_REQ_DURATION, MetricKind::Histogram, Unit::Micros);
        let http_req_failed = registry.register(HTTP_REQ_FAILED, MetricKind::Rate, Unit::Count);
        let checks = registry.register(CHECKS, MetricKind::Rate, Unit::Count);
        let check_series = check_names
            .iter()
            .map(|name| {
                let id = registry.register_series(
                    CHECKS,
                    &[("check", name.as_ref())],
                    MetricKind::Rate,
                    Unit::Count,
                );
                (name.clone(), id)
            })
            .collect();
        let data_received = registry.register(DATA_RECEIVED, MetricKind::Counter, Unit::Bytes);
        let data_sent = registry.register(DATA_SENT, MetricKind::Counter, Unit::Bytes);
        let vus = registry.register(VUS, MetricKind::Gauge, Unit::Count);
        let vus_max = registry.register(VUS_MAX, MetricKind::Gauge, Unit::Count);

        Self {
            registry,
            iterations,
            iteration_status,
            iteration_duration,
            http_reqs,
            http_req_duration,
            http_req_failed,
            checks,
            check_series,
            data_received,
            data_sent,
            vus,
            vus_max,
        }
    }

    fn error_series(&self, kind: &str) -> MetricId {
        self.registry.register_series(
            HTTP_REQ_ERRORS,
            &[("kind", kind)],
            MetricKind::Counter,
            Unit::Count,
        )
    }

    pub fn record(&self, sample: &Sample) {
        // Registration takes the registry's write lock, so it happens before the shard lock.
        let error_id = sample.error.as_ref().map(|e| self.error_series(e.kind()));
        let status_id = self
            .iteration_status
            .iter()
            .find(|(s, _)| *s == sample.status)
            .map(|(_, id)| *id);

        self.registry.record(sample.vu, |w| {
            w.add(self.iterations, 1);
            if let Some(id) = status_id {
                w.add(id, 1);
            }
            w.observe(self.iteration_duration, micros(sample.iteration_duration));

            if sample.reached_transport() {
                w.add(self.http_reqs, 1);
                w.add_rate(self.http_req_failed, sample.status != SampleStatus::Success);
            }
            if matches!(sample.status, SampleStatus::Success | SampleStatus::Failure) {
                w.observe(self.http_req_duration, micros(sample.latency));
            }
            if let Some(id) = error_id {
                w.add(id, 1);
            }

            for outcome in &sample.checks {
                w.add_rate(self.checks, outcome.passed);
                let series = self.check_series.iter().find(|(n, _)| *n == outcome.name);
                if let Some((_, id)) = series {
                    w.add_rate(*id, outcome.passed);
                }
            }

            if let Some(meta) = &sample.response {
                w.add(self.data_received, meta.bytes_received);
                w.add(self.data_sent, meta.bytes_sent);
            }
        });
    }

    /// Applies a change in the number of running VUs.
    pub fn add_vus(&self, shard_hint: u64, delta: i64) {
        self.registry.record(shard_hint, |w| w.add_gauge(self.vus, delta));
    }

    pub fn set_vus_max(&self, vus: u64) {
        let vus = i64::try_from(vus).unwrap_or(i64::MAX);
        self.registry.record(0, |w| w.add_gauge(self.vus_max, vus));
    }

    pub fn snapshot(&self) -> MetricsState {
        MetricsState {
            snapshot: self.registry.snapshot(),
        }
    }
}

fn micros(d: Duration) -> u64 {
    d.as_micros().min(u64::MAX as u128) as u64
}

/// Consistent point-in-time view of a [`MetricSink`].
#[derive(Debug, Clone, Default)]
pub struct MetricsState {
    snapshot: Snapshot,
}

impl MetricsState {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.snapshot.counter(name, &[]).unwrap_or(0)
    }

    pub fn iterations(&self) -> u64 {
        self.counter(ITERATIONS)
    }

    pub fn status_count(&self, status: SampleStatus) -> u64 {
        let tag = status.to_string();
        self.snapshot
            .counter(ITERATIONS, &[("status", tag.as_str())])
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> i64 {
        match self.snapshot.find(name, &[]).map(|s| s.summary()) {
            Some(MetricValue::Gauge(v)) => v,
            _ => 0,
        }
    }

    /// `(hits, total)` of the base failure rate.
    pub fn failed_requests(&self) -> (u64, u64) {
        self.snapshot
            .find(HTTP_REQ_FAILED, &[])
            .and_then(|s| s.rate())
            .map(|(total, hits)| (hits, total))
            .unwrap_or((0, 0))
    }

    pub fn latency(&self) -> Option<HistogramSummary> {
        self.histogram(HTTP_REQ_DURATION)
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSummary> {
        match self.snapshot.find(name, &[]).map(|s| s.summary()) {
            Some(MetricValue::Histogram(h)) => Some(h),
            _ => None,
        }
    }

    /// Percentile of request latency in milliseconds.
    pub fn latency_percentile(&self, pct: f64) -> Option<f64> {
        self.snapshot
            .find(HTTP_REQ_DURATION, &[])
            .and_then(|s| s.percentile(pct))
    }

    /// Per-check totals, in declaration order.
    pub fn checks(&self, names: &[Arc<str>]) -> Vec<CheckSummary> {
        names
            .iter()
            .map(|name| {
                let (total, hits) = self
                    .snapshot
                    .find(CHECKS, &[("check", name.as_ref())])
                    .and_then(|s| s.rate())
                    .unwrap_or((0, 0));
                CheckSummary {
                    name: name.to_string(),
                    passes: hits,
                    fails: total.saturating_sub(hits),
                }
            })
            .collect()
    }

    /// Failures of all checks combined.
    pub fn checks_failed(&self) -> u64 {
        self.snapshot
            .find(CHECKS, &[])
            .and_then(|s| s.rate())
            .map(|(total, hits)| total.saturating_sub(hits))
            .unwrap_or(0)
    }

    /// Error counts by kind, sorted by kind.
    pub fn errors_by_kind(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .snapshot
            .series()
            .iter()
            .filter(|s| s.name.as_ref() == HTTP_REQ_ERRORS)
            .filter_map(|s| Some((s.tag("kind")?.to_string(), s.counter()?)))
            .filter(|(_, n)| *n > 0)
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::sample::{CheckOutcome, IterationError, ResponseMeta};
    use crate::runner::{TransportError, TransportErrorKind};

    fn names() -> Vec<Arc<str>> {
        vec![Arc::from("is status 200")]
    }

    fn sample(vu: u64, status: SampleStatus, latency_ms: u64) -> Sample {
        Sample {
            vu,
            started_at: Duration::ZERO,
            latency: Duration::from_millis(latency_ms),
            iteration_duration: Duration::from_millis(latency_ms + 1),
            status,
            checks: vec![CheckOutcome {
                name: Arc::from("is status 200"),
                passed: status == SampleStatus::Success,
            }],
            response: Some(ResponseMeta {
                status: if status == SampleStatus::Success { 200 } else { 500 },
                bytes_received: 100,
                bytes_sent: 10,
            }),
            error: None,
        }
    }

    #[test]
    fn one_sample_updates_every_series() {
        let sink = MetricSink::new(&names());
        sink.record(&sample(1, SampleStatus::Success, 50));
        sink.record(&sample(2, SampleStatus::Failure, 70));

        let state = sink.snapshot();
        assert_eq!(state.iterations(), 2);
        assert_eq!(state.counter(HTTP_REQS), 2);
        assert_eq!(state.status_count(SampleStatus::Success), 1);
        assert_eq!(state.status_count(SampleStatus::Failure), 1);
        assert_eq!(state.failed_requests(), (1, 2));
        assert_eq!(state.counter(DATA_RECEIVED), 200);
        assert_eq!(state.counter(DATA_SENT), 20);
        assert_eq!(
            state.checks(&names()),
            vec![CheckSummary {
                name: "is status 200".to_string(),
                passes: 1,
                fails: 1,
            }]
        );
        assert_eq!(state.checks_failed(), 1);
        assert_eq!(state.latency().map(|h| h.count), Some(2));
    }

    #[test]
    fn build_errors_are_not_requests() {
        let sink = MetricSink::new(&[]);
        sink.record(&Sample {
            vu: 1,
            started_at: Duration::ZERO,
            latency: Duration::ZERO,
            iteration_duration: Duration::from_micros(3),
            status: SampleStatus::Error,
            checks: Vec::new(),
            response: None,
            error: Some(IterationError::Build("bad payload".into())),
        });
        sink.record(&Sample {
            vu: 1,
            started_at: Duration::ZERO,
            latency: Duration::from_millis(2),
            iteration_duration: Duration::from_millis(2),
            status: SampleStatus::Error,
            checks: Vec::new(),
            response: None,
            error: Some(IterationError::Transport(TransportError::new(
                TransportErrorKind::Connect,
                "refused",
            ))),
        });

        let state = sink.snapshot();
        assert_eq!(state.iterations(), 2);
        assert_eq!(state.counter(HTTP_REQS), 1);
        assert_eq!(state.failed_requests(), (1, 1));
        assert_eq!(state.latency().map(|h| h.count), Some(0));
        assert_eq!(
            state.errors_by_kind(),
            vec![("build".to_string(), 1), ("connect".to_string(), 1)]
        );
    }

    #[test]
    fn concurrent_records_are_never_lost() {
        let sink = MetricSink::new(&names());
        std::thread::scope(|s| {
            for vu in 1..=8u64 {
                let sink = &sink;
                s.spawn(move || {
                    for i in 0..1_000u64 {
                        sink.record(&sample(vu, SampleStatus::Success, i % 100));
                    }
                });
            }
        });

        let state = sink.snapshot();
        assert_eq!(state.iterations(), 8_000);
        assert_eq!(state.status_count(SampleStatus::Success), 8_000);
        assert_eq!(state.latency().map(|h| h.count), Some(8_000));
        assert_eq!(state.checks(&names())[0].passes, 8_000);
    }

    #[test]
    fn catalogue_kinds_match_registered_series() {
        let sink = MetricSink::new(&names());
        sink.record(&Sample {
            error: Some(IterationError::Transport(TransportError::new(
                TransportErrorKind::Timeout,
                "slow",
            ))),
            ..sample(1, SampleStatus::Error, 5)
        });

        let state = sink.snapshot();
        assert!(
            state
                .snapshot()
                .find(HTTP_REQ_ERRORS, &[("kind", "timeout")])
                .is_some()
        );
        for series in state.snapshot().series() {
            assert_eq!(
                metric_kind(&series.name),
                Some(series.kind),
                "series `{}`",
                series.name
            );
        }
        assert_eq!(metric_kind("custom_metric"), None);
    }

    #[test]
    fn vus_gauge_sums_deltas() {
        let sink = MetricSink::new(&[]);
        sink.set_vus_max(10);
        sink.add_vus(1, 1);
        sink.add_vus(2, 1);
        sink.add_vus(1, -1);
        let state = sink.snapshot();
        assert_eq!(state.gauge(VUS), 1);
        assert_eq!(state.gauge(VUS_MAX), 10);
    }
}
