use crate::exit_codes::ExitCode;

/// Failure that ends the CLI before a [`RunResult`](loadgate_core::RunResult) exists.
#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }
}

/// Configuration errors from the engine are the user's workload; anything else is ours.
impl From<loadgate_core::Error> for RunError {
    fn from(err: loadgate_core::Error) -> Self {
        if err.is_configuration() {
            Self::InvalidInput(anyhow::Error::new(err).context("invalid workload"))
        } else {
            Self::RuntimeError(anyhow::Error::new(err))
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
