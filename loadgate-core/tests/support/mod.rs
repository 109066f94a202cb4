#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use loadgate_core::runner::{
    RequestSpec, ResponseSpec, RunState, StaticRequest, Transport, TransportError, TransportErrorKind,
    WorkloadDefinition,
};
use tokio::sync::watch;
use tokio::time::Instant;

pub const URL: &str = "http://localhost:8081/hand/probability";

pub fn workload() -> WorkloadDefinition {
    WorkloadDefinition::new(StaticRequest(
        RequestSpec::post(
            URL,
            r#"{"hole":["HA","SA"],"community":[],"num_players":5,"simulations":10000}"#,
        )
        .with_header("Content-Type", "application/json"),
    ))
}

/// Answers every request with a fixed status after a fixed delay, and counts calls.
pub struct StubTransport {
    pub status: u16,
    pub delay: Duration,
    pub calls: AtomicU64,
    pub last_send: Mutex<Option<Instant>>,
    pub fail_prepare_for: Option<u64>,
    /// When set, `prepare_vu` records the controller state it observes.
    pub state: Option<watch::Receiver<RunState>>,
    pub states_at_prepare: Mutex<Vec<RunState>>,
}

impl StubTransport {
    pub fn new(status: u16, delay: Duration) -> Self {
        Self {
            status,
            delay,
            calls: AtomicU64::new(0),
            last_send: Mutex::new(None),
            fail_prepare_for: None,
            state: None,
            states_at_prepare: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn states_at_prepare(&self) -> Vec<RunState> {
        self.states_at_prepare
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last_send(&self) -> Option<Instant> {
        *self
            .last_send
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for StubTransport {
    async fn send(&self, _request: RequestSpec) -> Result<ResponseSpec, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut last = self
                .last_send
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            if last.is_none_or(|prev| now > prev) {
                *last = Some(now);
            }
        }

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        let mut res = ResponseSpec::with_status(self.status);
        res.bytes_sent = 120;
        res.bytes_received = 64;
        Ok(res)
    }

    async fn prepare_vu(&self, vu: u64) -> Result<(), TransportError> {
        if let Some(state) = &self.state {
            let current = *state.borrow();
            self.states_at_prepare
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(current);
        }
        if self.fail_prepare_for == Some(vu) {
            return Err(TransportError::new(
                TransportErrorKind::Connect,
                "connection pool exhausted",
            ));
        }
        Ok(())
    }
}

pub fn stub(status: u16, delay: Duration) -> Arc<StubTransport> {
    Arc::new(StubTransport::new(status, delay))
}
