pub mod runner;

pub use loadgate_metrics as metrics;
pub use runner::{
    Error, RequestSpec, ResponseSpec, Result, RunController, RunResult, RunState, Transport,
    TransportError, TransportErrorKind, WorkloadDefinition,
};
