use std::sync::Arc;
use std::time::Duration;

use super::config::{PlanWork, RunPlan};
use super::sink::{self, MetricsState};

#[derive(Debug, Clone, Default)]
pub struct LiveMetrics {
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    pub iterations_per_sec_now: f64,
    /// Failed requests / total requests during the last progress interval (0..=1).
    pub error_rate_now: f64,

    pub requests_total: u64,
    pub iterations_total: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,

    /// Whole-run latency percentiles so far, in milliseconds.
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub enum ScenarioProgress {
    ConstantVus {
        vus: u64,
        duration: Option<Duration>,
        iterations: Option<u64>,
    },
    RampingVus {
        total_duration: Duration,
        stage: Option<StageProgress>,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub scenario: String,
    pub active_vus: u64,
    pub max_vus: u64,
    pub metrics: LiveMetrics,
    pub progress: ScenarioProgress,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

#[derive(Debug, Default)]
struct Totals {
    requests: u64,
    iterations: u64,
    failed: u64,
}

/// Turns successive metric snapshots into progress updates.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    plan: Arc<RunPlan>,
    tick: u64,
    last: Totals,
}

impl ProgressTracker {
    pub(crate) fn new(plan: Arc<RunPlan>) -> Self {
        Self {
            plan,
            tick: 0,
            last: Totals::default(),
        }
    }

    pub(crate) fn update(
        &mut self,
        state: &MetricsState,
        elapsed: Duration,
        dt: Duration,
    ) -> ProgressUpdate {
        self.tick = self.tick.saturating_add(1);
        let secs = dt.as_secs_f64().max(1e-9);

        let requests_total = state.counter(sink::HTTP_REQS);
        let iterations_total = state.iterations();
        let (failed_requests_total, _) = state.failed_requests();

        let delta_req = requests_total.saturating_sub(self.last.requests);
        let delta_iter = iterations_total.saturating_sub(self.last.iterations);
        let delta_failed = failed_requests_total.saturating_sub(self.last.failed);
        self.last = Totals {
            requests: requests_total,
            iterations: iterations_total,
            failed: failed_requests_total,
        };

        let metrics = LiveMetrics {
            rps_now: delta_req as f64 / secs,
            iterations_per_sec_now: delta_iter as f64 / secs,
            error_rate_now: if delta_req == 0 {
                0.0
            } else {
                delta_failed as f64 / delta_req as f64
            },
            requests_total,
            iterations_total,
            failed_requests_total,
            checks_failed_total: state.checks_failed(),
            bytes_received_total: state.counter(sink::DATA_RECEIVED),
            bytes_sent_total: state.counter(sink::DATA_SENT),
            latency_p50_ms: state.latency_percentile(50.0),
            latency_p95_ms: state.latency_percentile(95.0),
        };

        let progress = match &self.plan.work {
            PlanWork::Constant { vus } => ScenarioProgress::ConstantVus {
                vus: *vus,
                duration: self.plan.deadline,
                iterations: self.plan.iterations,
            },
            PlanWork::Ramping { schedule } => {
                let stage = schedule
                    .stage_snapshot_at(elapsed)
                    .map(|st| StageProgress {
                        stage: st.index + 1,
                        stages: st.count,
                        stage_elapsed: st.stage_elapsed,
                        stage_remaining: st.stage_remaining,
                        start_target: st.start_target,
                        end_target: st.end_target,
                        current_target: st.current_target,
                    });
                ScenarioProgress::RampingVus {
                    total_duration: schedule.total_duration(),
                    stage,
                }
            }
        };

        ProgressUpdate {
            tick: self.tick,
            elapsed,
            scenario: self.plan.name.to_string(),
            active_vus: u64::try_from(state.gauge(sink::VUS)).unwrap_or(0),
            max_vus: self.plan.max_vus,
            metrics,
            progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::sample::{Sample, SampleStatus};
    use crate::runner::{MetricSink, RequestSpec, StaticRequest, WorkloadDefinition};

    #[test]
    fn rates_are_computed_per_interval() {
        let plan = Arc::new(
            WorkloadDefinition::new(StaticRequest(RequestSpec::get("http://x/")))
                .vus(2)
                .duration(Duration::from_secs(10))
                .validate()
                .unwrap_or_else(|e| panic!("{e}")),
        );
        let sink = MetricSink::new(&plan.check_names);
        let mut tracker = ProgressTracker::new(plan);

        let sample = |status| Sample {
            vu: 1,
            started_at: Duration::ZERO,
            latency: Duration::from_millis(10),
            iteration_duration: Duration::from_millis(10),
            status,
            checks: Vec::new(),
            response: None,
            error: None,
        };

        for _ in 0..10 {
            sink.record(&sample(SampleStatus::Success));
        }
        let first = tracker.update(&sink.snapshot(), Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(first.tick, 1);
        assert_eq!(first.metrics.rps_now, 10.0);

        for _ in 0..2 {
            sink.record(&sample(SampleStatus::Failure));
        }
        let second =
            tracker.update(&sink.snapshot(), Duration::from_secs(2), Duration::from_millis(500));
        assert_eq!(second.tick, 2);
        assert_eq!(second.metrics.rps_now, 4.0);
        assert_eq!(second.metrics.error_rate_now, 1.0);
        assert_eq!(second.metrics.requests_total, 12);
        assert!(matches!(
            second.progress,
            ScenarioProgress::ConstantVus { vus: 2, .. }
        ));
    }
}
