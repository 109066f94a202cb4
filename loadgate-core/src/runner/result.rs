use std::time::Duration;

use loadgate_metrics::{HistogramSummary, MetricSeriesSummary};

use super::gate::StopReason;
use super::sink::CheckSummary;
use super::thresholds::{ThresholdOutcome, ThresholdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Configuring,
    Running,
    Draining,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    /// The external cancellation signal was raised.
    Cancelled,
    /// An `abort_on_fail` threshold was violated while running.
    Threshold,
    SchedulerFault,
}

/// Iteration counts by terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: u64,
    pub failure: u64,
    pub error: u64,
    pub aborted: u64,
}

/// Terminal artifact of one run. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub scenario: String,
    pub state: RunState,
    pub abort_reason: Option<AbortReason>,
    /// Why admission stopped; `None` when the run never started.
    pub stop_reason: Option<StopReason>,
    /// From the start signal to the end of draining.
    pub duration: Duration,
    pub vus_started: u64,
    pub vus_max: u64,
    pub iterations_total: u64,
    pub statuses: StatusCounts,
    pub requests_total: u64,
    pub data_received: u64,
    pub data_sent: u64,
    /// Error samples by kind (`connect`, `timeout`, `build`, ...).
    pub errors_by_kind: Vec<(String, u64)>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
    /// True iff every threshold is satisfied.
    pub overall_pass: bool,
    /// Request latency in milliseconds.
    pub latency: Option<HistogramSummary>,
    /// Run-level errors.
    pub errors: Vec<String>,
    /// False when the run lost track of samples (scheduler faults).
    pub metrics_complete: bool,
    pub metrics: Vec<MetricSeriesSummary>,
}

impl RunResult {
    pub fn checks_failed(&self) -> bool {
        self.checks.iter().any(|c| c.fails > 0)
    }

    pub fn thresholds_failed(&self) -> bool {
        !self.overall_pass
    }

    pub fn threshold_count(&self, outcome: ThresholdOutcome) -> usize {
        self.thresholds
            .iter()
            .filter(|t| t.outcome == outcome)
            .count()
    }

    pub fn rps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.requests_total as f64 / secs
        } else {
            0.0
        }
    }
}
