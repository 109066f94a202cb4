use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::workload::{RequestSpec, ResponseSpec};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Request,
    Body,
    InvalidRequest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Capability that sends one request and waits for the full response.
///
/// The engine measures latency around `send`; implementations should not add their own
/// retries (wrap them in [`Retry`] instead).
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: RequestSpec,
    ) -> impl Future<Output = Result<ResponseSpec, TransportError>> + Send;

    /// Called once per VU before the run starts, outside measured time.
    fn prepare_vu(&self, vu: u64) -> impl Future<Output = Result<(), TransportError>> + Send {
        let _ = vu;
        std::future::ready(Ok(()))
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: RequestSpec,
    ) -> impl Future<Output = Result<ResponseSpec, TransportError>> + Send {
        (**self).send(request)
    }

    fn prepare_vu(&self, vu: u64) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).prepare_vu(vu)
    }
}

/// Explicit retry policy around another transport.
#[derive(Debug, Clone)]
pub struct Retry<T> {
    inner: T,
    attempts: u32,
    backoff: Duration,
    retry_server_errors: bool,
}

impl<T: Transport> Retry<T> {
    /// `attempts` is the total number of sends, including the first one.
    pub fn new(inner: T, attempts: u32) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff: Duration::ZERO,
            retry_server_errors: false,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Also retry responses with a 5xx status.
    #[must_use]
    pub fn retry_server_errors(mut self, enabled: bool) -> Self {
        self.retry_server_errors = enabled;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_retry(&self, res: &Result<ResponseSpec, TransportError>) -> bool {
        match res {
            Ok(r) => self.retry_server_errors && r.status >= 500,
            Err(e) => e.kind != TransportErrorKind::InvalidRequest,
        }
    }
}

impl<T: Transport> Transport for Retry<T> {
    fn send(
        &self,
        request: RequestSpec,
    ) -> impl Future<Output = Result<ResponseSpec, TransportError>> + Send {
        async move {
            let mut attempt = 1;
            loop {
                let res = self.inner.send(request.clone()).await;
                if attempt >= self.attempts || !self.should_retry(&res) {
                    return res;
                }
                tracing::debug!(attempt, url = %request.url, "retrying request");
                attempt += 1;
                if !self.backoff.is_zero() {
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }
    }

    fn prepare_vu(&self, vu: u64) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.inner.prepare_vu(vu)
    }
}
