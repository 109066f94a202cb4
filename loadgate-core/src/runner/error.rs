pub type Result<T> = std::result::Result<T, Error>;

/// Run-level failures. Iteration-level problems never show up here; they become samples.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("a `duration` or an `iterations` cap is required")]
    MissingStopCondition,

    #[error("`stages` must be a non-empty array of {{ duration, target }} with a positive total duration")]
    InvalidStages,

    #[error("a request builder is required")]
    MissingRequestBuilder,

    #[error("duplicate check name `{0}`")]
    DuplicateCheck(String),

    #[error("invalid threshold for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error("scheduler fault: {0}")]
    SchedulerFault(String),
}

impl Error {
    /// True for errors raised while validating a workload, before any VU starts.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::SchedulerFault(_))
    }
}
