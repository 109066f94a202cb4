use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::Instant;

use super::config::RunPlan;
use super::sample::{CheckOutcome, IterationError, ResponseMeta, Sample, SampleStatus};
use super::sink::MetricSink;
use super::transport::Transport;
use super::vu::VirtualUser;
use super::workload::{Check, IterationContext, RequestBuilder, ResponseSpec};

/// Runs one iteration: build, send, check, and hand the sample to the sink.
///
/// Cloning is cheap; every VU holds its own copy.
pub struct IterationExecutor<T> {
    scenario: Arc<str>,
    request: Arc<dyn RequestBuilder>,
    checks: Arc<[Arc<dyn Check>]>,
    check_names: Arc<[Arc<str>]>,
    transport: Arc<T>,
    sink: Arc<MetricSink>,
    run_start: Instant,
}

impl<T> Clone for IterationExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            request: self.request.clone(),
            checks: self.checks.clone(),
            check_names: self.check_names.clone(),
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            run_start: self.run_start,
        }
    }
}

impl<T: Transport> IterationExecutor<T> {
    pub fn new(plan: &RunPlan, transport: Arc<T>, sink: Arc<MetricSink>, run_start: Instant) -> Self {
        Self {
            scenario: plan.name.clone(),
            request: plan.request.clone(),
            checks: plan.checks.clone(),
            check_names: plan.check_names.clone(),
            transport,
            sink,
            run_start,
        }
    }

    pub fn sink(&self) -> &Arc<MetricSink> {
        &self.sink
    }

    /// Executes one iteration and returns its sample without recording it.
    pub async fn execute(&self, vu: u64, iteration: u64) -> Sample {
        let started_at = self.run_start.elapsed();
        self.execute_at(vu, iteration, started_at).await
    }

    /// Executes one iteration on behalf of `vu` and records the sample, unless the scheduler
    /// abandoned the iteration first. Returns `false` once the VU has been abandoned.
    pub async fn execute_and_record(&self, vu: &VirtualUser, iteration: u64) -> bool {
        let started_at = self.run_start.elapsed();
        if !vu.begin_iteration(started_at) {
            return false;
        }

        let sample = self.execute_at(vu.id(), iteration, started_at).await;

        if vu.finish_iteration() {
            self.sink.record(&sample);
            true
        } else {
            false
        }
    }

    async fn execute_at(&self, vu: u64, iteration: u64, started_at: std::time::Duration) -> Sample {
        let iteration_start = Instant::now();
        let ctx = IterationContext {
            scenario: &self.scenario,
            vu,
            iteration,
        };

        let built = std::panic::catch_unwind(AssertUnwindSafe(|| self.request.build(&ctx)));
        let request = match built {
            Ok(Ok(request)) => request,
            Ok(Err(err)) => {
                return error_sample(vu, started_at, iteration_start, IterationError::Build(err.0));
            }
            Err(payload) => {
                let msg = format!("panicked: {}", panic_message(payload.as_ref()));
                return error_sample(vu, started_at, iteration_start, IterationError::Build(msg));
            }
        };

        let sent = Instant::now();
        let res = AssertUnwindSafe(self.transport.send(request))
            .catch_unwind()
            .await;
        let latency = sent.elapsed();

        match res {
            Ok(Ok(response)) => {
                let status = if response.is_protocol_success() {
                    SampleStatus::Success
                } else {
                    SampleStatus::Failure
                };
                let checks = self.run_checks(&response);
                Sample {
                    vu,
                    started_at,
                    latency,
                    iteration_duration: iteration_start.elapsed(),
                    status,
                    checks,
                    response: Some(ResponseMeta {
                        status: response.status,
                        bytes_received: response.bytes_received,
                        bytes_sent: response.bytes_sent,
                    }),
                    error: None,
                }
            }
            Ok(Err(err)) => {
                tracing::trace!(vu, error = %err, "transport error");
                Sample {
                    latency,
                    ..error_sample(vu, started_at, iteration_start, IterationError::Transport(err))
                }
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::warn!(vu, panic = %msg, "transport panicked");
                Sample {
                    latency,
                    ..error_sample(vu, started_at, iteration_start, IterationError::Panic(msg))
                }
            }
        }
    }

    fn run_checks(&self, response: &ResponseSpec) -> Vec<CheckOutcome> {
        self.checks
            .iter()
            .zip(self.check_names.iter())
            .map(|(check, name)| {
                let passed = std::panic::catch_unwind(AssertUnwindSafe(|| check.check(response)))
                    .unwrap_or_else(|payload| {
                        tracing::debug!(
                            check = %name,
                            panic = %panic_message(payload.as_ref()),
                            "check panicked"
                        );
                        false
                    });
                CheckOutcome {
                    name: name.clone(),
                    passed,
                }
            })
            .collect()
    }
}

fn error_sample(
    vu: u64,
    started_at: std::time::Duration,
    iteration_start: Instant,
    error: IterationError,
) -> Sample {
    Sample {
        vu,
        started_at,
        latency: std::time::Duration::ZERO,
        iteration_duration: iteration_start.elapsed(),
        status: SampleStatus::Error,
        checks: Vec::new(),
        response: None,
        error: Some(error),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
