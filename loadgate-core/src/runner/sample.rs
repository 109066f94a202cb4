use std::sync::Arc;
use std::time::Duration;

use super::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SampleStatus {
    /// The transport call completed with a non-error status.
    Success,
    /// The transport call completed with a protocol-level error status.
    Failure,
    /// Request building or the transport call failed.
    Error,
    /// Still in flight when the grace period expired.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationError {
    /// The request builder returned an error or panicked.
    Build(String),
    Transport(TransportError),
    /// The transport panicked while sending.
    Panic(String),
}

impl IterationError {
    /// Tag value for the `http_req_errors` series.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Panic(_) => "panic",
            Self::Transport(e) => e.kind.into(),
        }
    }
}

impl std::fmt::Display for IterationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build(msg) => write!(f, "request build failed: {msg}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Panic(msg) => write!(f, "iteration panicked: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: Arc<str>,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseMeta {
    pub status: u16,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub vu: u64,
    /// Iteration start, relative to the run start.
    pub started_at: Duration,
    /// Transport latency; zero when the transport was never invoked.
    pub latency: Duration,
    /// Whole iteration including request building and checks.
    pub iteration_duration: Duration,
    pub status: SampleStatus,
    pub checks: Vec<CheckOutcome>,
    pub response: Option<ResponseMeta>,
    pub error: Option<IterationError>,
}

impl Sample {
    pub(crate) fn aborted(vu: u64, started_at: Duration, in_flight_for: Duration) -> Self {
        Self {
            vu,
            started_at,
            latency: in_flight_for,
            iteration_duration: in_flight_for,
            status: SampleStatus::Aborted,
            checks: Vec::new(),
            response: None,
            error: None,
        }
    }

    /// Whether the iteration got as far as handing a request to the transport.
    pub fn reached_transport(&self) -> bool {
        !matches!(self.error, Some(IterationError::Build(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TransportErrorKind;

    #[test]
    fn error_kind_tags() {
        assert_eq!(IterationError::Build("x".into()).kind(), "build");
        assert_eq!(IterationError::Panic("x".into()).kind(), "panic");
        let e = TransportError::new(TransportErrorKind::Timeout, "slow");
        assert_eq!(IterationError::Transport(e).kind(), "timeout");
        let e = TransportError::new(TransportErrorKind::InvalidRequest, "bad url");
        assert_eq!(IterationError::Transport(e).kind(), "invalid_request");
    }

    #[test]
    fn aborted_sample_reached_transport() {
        let s = Sample::aborted(1, Duration::ZERO, Duration::from_secs(30));
        assert_eq!(s.status, SampleStatus::Aborted);
        assert!(s.reached_transport());
    }
}
