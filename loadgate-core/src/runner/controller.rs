use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::{RunPlan, WorkloadDefinition};
use super::error::Result;
use super::gate::{IterationGate, StopReason};
use super::progress::{ProgressFn, ProgressTracker};
use super::result::{AbortReason, RunResult, RunState, StatusCounts};
use super::sample::SampleStatus;
use super::scheduler::{SchedulerOutcome, VuScheduler};
use super::sink::{self, MetricSink};
use super::thresholds::{ThresholdOutcome, evaluate_one, evaluate_thresholds};
use super::transport::Transport;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const ABORT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Top-level orchestration of one run.
///
/// `Configuring` happens in [`RunController::new`]; an invalid workload never gets a
/// controller. [`RunController::run`] then walks `Running -> Draining -> Completed`, or
/// ends in `Aborted`.
pub struct RunController {
    plan: Arc<RunPlan>,
    sink: Arc<MetricSink>,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
    progress: Option<ProgressFn>,
}

impl RunController {
    pub fn new(workload: WorkloadDefinition) -> Result<Self> {
        let plan = workload.validate()?;
        let sink = Arc::new(MetricSink::new(&plan.check_names));
        let (state, _) = watch::channel(RunState::Configuring);
        Ok(Self {
            plan: Arc::new(plan),
            sink,
            cancel: CancellationToken::new(),
            state,
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Uses an externally owned cancellation token instead of a fresh one.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, to: RunState) {
        let from = self.state.send_replace(to);
        tracing::info!(scenario = %self.plan.name, %from, %to, "run state changed");
    }

    pub async fn run<T: Transport>(self, transport: T) -> RunResult {
        let scheduler = VuScheduler::new(
            self.plan.clone(),
            Arc::new(transport),
            self.sink.clone(),
            self.cancel.clone(),
        );

        // VU initialisation belongs to Running; the measured clock starts with the signal.
        self.transition(RunState::Running);
        let mut running = match scheduler.start().await {
            Ok(running) => running,
            Err(err) => {
                self.transition(RunState::Aborted);
                return self.finish(None, vec![err.to_string()], Some(AbortReason::SchedulerFault));
            }
        };

        let gate = running.gate().clone();
        let started = running.started_at();
        let progress_task = self.spawn_progress(started);
        let abort_task = self.spawn_abort_watch(gate.clone());

        let reason = running.wait_for_stop().await;
        tracing::debug!(%reason, "admission stopped");
        self.transition(RunState::Draining);

        let outcome = running.drain().await;

        if let Some(task) = progress_task {
            task.abort();
            let _ = task.await;
        }
        let threshold_abort = match abort_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };

        let mut errors = Vec::new();
        let abort_reason = match outcome.reason {
            StopReason::Cancelled => {
                errors.push("run cancelled".to_string());
                Some(AbortReason::Cancelled)
            }
            StopReason::ThresholdAbort => {
                errors.push(match threshold_abort {
                    Some(t) => format!("threshold {t} violated, run aborted"),
                    None => "threshold violated, run aborted".to_string(),
                });
                Some(AbortReason::Threshold)
            }
            StopReason::Deadline | StopReason::IterationCap => None,
        };
        if outcome.abandoned > 0 {
            errors.push(format!(
                "{} iteration(s) still in flight after the {:?} grace period were aborted",
                outcome.abandoned, self.plan.graceful_stop
            ));
        }
        let abort_reason = if outcome.faults.is_empty() {
            abort_reason
        } else {
            errors.extend(outcome.faults.iter().cloned());
            Some(AbortReason::SchedulerFault)
        };

        self.transition(if abort_reason.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        });

        self.finish(Some(outcome), errors, abort_reason)
    }

    /// Takes the single final snapshot and evaluates thresholds against it.
    fn finish(
        &self,
        outcome: Option<SchedulerOutcome>,
        errors: Vec<String>,
        abort_reason: Option<AbortReason>,
    ) -> RunResult {
        let state = self.sink.snapshot();
        let thresholds = evaluate_thresholds(&self.plan.thresholds, state.snapshot());
        let overall_pass = thresholds.iter().all(|t| t.passed());

        let metrics_complete = outcome.as_ref().is_some_and(|o| o.faults.is_empty());
        let result = RunResult {
            scenario: self.plan.name.to_string(),
            state: *self.state.borrow(),
            abort_reason,
            stop_reason: outcome.as_ref().map(|o| o.reason),
            duration: outcome.as_ref().map(|o| o.elapsed).unwrap_or_default(),
            vus_started: outcome.as_ref().map(|o| o.vus_started).unwrap_or(0),
            vus_max: self.plan.max_vus,
            iterations_total: state.iterations(),
            statuses: StatusCounts {
                success: state.status_count(SampleStatus::Success),
                failure: state.status_count(SampleStatus::Failure),
                error: state.status_count(SampleStatus::Error),
                aborted: state.status_count(SampleStatus::Aborted),
            },
            requests_total: state.counter(sink::HTTP_REQS),
            data_received: state.counter(sink::DATA_RECEIVED),
            data_sent: state.counter(sink::DATA_SENT),
            errors_by_kind: state.errors_by_kind(),
            checks: state.checks(&self.plan.check_names),
            thresholds,
            overall_pass,
            latency: state.latency(),
            errors,
            metrics_complete,
            metrics: state.snapshot().summarize(),
        };

        tracing::info!(
            scenario = %result.scenario,
            state = %result.state,
            iterations = result.iterations_total,
            pass = result.overall_pass,
            "run finished"
        );
        result
    }

    fn spawn_progress(&self, started: Instant) -> Option<JoinHandle<()>> {
        let progress = self.progress.clone()?;
        let sink = self.sink.clone();
        let mut tracker = ProgressTracker::new(self.plan.clone());

        Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_at = started;

            loop {
                interval.tick().await;
                let now = Instant::now();
                let dt = now.duration_since(last_at);
                last_at = now;

                let update = tracker.update(&sink.snapshot(), started.elapsed(), dt);
                (progress)(update);
            }
        }))
    }

    /// Periodically evaluates `abort_on_fail` thresholds and closes the gate on the first
    /// violation. Resolves to the violated threshold.
    fn spawn_abort_watch(&self, gate: Arc<IterationGate>) -> Option<JoinHandle<Option<String>>> {
        if !self.plan.thresholds.iter().any(|t| t.abort_on_fail) {
            return None;
        }

        let plan = self.plan.clone();
        let sink = self.sink.clone();
        Some(tokio::spawn(async move {
            let start = Instant::now() + ABORT_CHECK_INTERVAL;
            let mut interval = tokio::time::interval_at(start, ABORT_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = gate.stopped() => return None,
                }

                let state = sink.snapshot();
                for threshold in plan.thresholds.iter().filter(|t| t.abort_on_fail) {
                    let res = evaluate_one(threshold, state.snapshot());
                    if res.outcome == ThresholdOutcome::Violated {
                        let name = format!("{}: {}", res.metric, res.expression);
                        tracing::warn!(threshold = %name, observed = ?res.observed, "aborting run");
                        gate.stop(StopReason::ThresholdAbort);
                        return Some(name);
                    }
                }
            }
        }))
    }
}
