use loadgate_core::runner::{AbortReason, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more checks failed.
    ChecksFailed = 10,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Checks and thresholds failed.
    ChecksAndThresholdsFailed = 12,

    /// The run was cancelled or stopped by an `abortOnFail` threshold.
    RunAborted = 20,

    /// Invalid CLI/config/workload (bad flags, invalid durations, invalid threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, scheduler faults, panics caught at top-level).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_quality_gates(checks_failed: bool, thresholds_failed: bool) -> Self {
        match (checks_failed, thresholds_failed) {
            (false, false) => Self::Success,
            (true, false) => Self::ChecksFailed,
            (false, true) => Self::ThresholdsFailed,
            (true, true) => Self::ChecksAndThresholdsFailed,
        }
    }

    #[must_use]
    pub fn from_result(result: &RunResult) -> Self {
        match result.abort_reason {
            Some(AbortReason::SchedulerFault) => Self::RuntimeError,
            Some(AbortReason::Cancelled | AbortReason::Threshold) => Self::RunAborted,
            None => Self::from_quality_gates(result.checks_failed(), result.thresholds_failed()),
        }
    }
}
