mod config;
mod controller;
mod error;
mod executor;
mod gate;
mod progress;
mod result;
mod sample;
mod schedule;
mod scheduler;
mod sink;
mod thresholds;
mod transport;
mod vu;
mod workload;

pub use config::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_SCENARIO, LoadProfile, PlanWork, RampMode, RunPlan, Stage,
    WorkloadDefinition,
};
pub use controller::RunController;
pub use error::{Error, Result};
pub use executor::IterationExecutor;
pub use gate::{IterationGate, StopReason};
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate, ScenarioProgress, StageProgress};
pub use result::{AbortReason, RunResult, RunState, StatusCounts};
pub use sample::{CheckOutcome, IterationError, ResponseMeta, Sample, SampleStatus};
pub use schedule::{RampingU64Schedule, StageSnapshot};
pub use scheduler::{RunningScheduler, SchedulerOutcome, VuScheduler};
pub use sink::{CheckSummary, MetricSink, MetricsState};
pub use thresholds::{
    MetricSelector, Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdOutcome,
    ThresholdResult, ThresholdSet, compile_thresholds, evaluate_thresholds, parse_threshold_expr,
};
pub use transport::{Retry, Transport, TransportError, TransportErrorKind};
pub use vu::{StartSignal, VirtualUser, VuState};
pub use workload::{
    BodyContainsCheck, BuildError, Check, FnCheck, FnRequest, IterationContext, RequestBuilder,
    RequestSpec, ResponseSpec, StaticRequest, StatusCheck, check_fn, request_fn,
};

/// Metric names recorded by [`MetricSink`].
pub mod metric_names {
    pub use super::sink::{
        CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_ERRORS, HTTP_REQ_FAILED,
        HTTP_REQS, ITERATION_DURATION, ITERATIONS, VUS, VUS_MAX,
    };
}
