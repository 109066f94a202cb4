use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Deadline,
    IterationCap,
    Cancelled,
    ThresholdAbort,
}

impl StopReason {
    fn to_u8(self) -> u8 {
        match self {
            StopReason::Deadline => 1,
            StopReason::IterationCap => 2,
            StopReason::Cancelled => 3,
            StopReason::ThresholdAbort => 4,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(StopReason::Deadline),
            2 => Some(StopReason::IterationCap),
            3 => Some(StopReason::Cancelled),
            4 => Some(StopReason::ThresholdAbort),
            _ => None,
        }
    }
}

/// Admission control shared by every VU of a run.
///
/// Each VU asks [`IterationGate::next`] before starting an iteration. The first stop
/// condition observed (deadline, iteration cap, external cancellation, or an explicit
/// [`IterationGate::stop`]) wins and is reported by [`IterationGate::reason`].
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
    cancel: CancellationToken,
    stop: CancellationToken,
    reason: AtomicU8,
}

impl IterationGate {
    pub fn new(
        iterations: Option<u64>,
        duration: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
            cancel,
            stop: CancellationToken::new(),
            reason: AtomicU8::new(0),
        }
    }

    pub fn start_at(&self, started: Instant) {
        if self.deadline.get().is_some() {
            return;
        }

        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get().copied()
    }

    /// Closes the gate. Only the first reason is kept.
    pub fn stop(&self, reason: StopReason) {
        let _ = self
            .reason
            .compare_exchange(0, reason.to_u8(), Ordering::AcqRel, Ordering::Acquire);
        self.stop.cancel();
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of iterations admitted so far.
    pub fn admitted(&self) -> u64 {
        let n = self.counter.load(Ordering::Relaxed);
        match self.iterations {
            Some(total) => n.min(total),
            None => n,
        }
    }

    pub fn next(&self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }

        if self.cancel.is_cancelled() {
            self.stop(StopReason::Cancelled);
            return false;
        }

        if let Some(deadline) = self.deadline.get()
            && Instant::now() >= *deadline
        {
            self.stop(StopReason::Deadline);
            return false;
        }

        if let Some(total) = self.iterations {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                self.stop(StopReason::IterationCap);
                return false;
            }
            if idx + 1 == total {
                // Last admission: nothing else may start, but this one still runs.
                self.stop(StopReason::IterationCap);
            }
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }

        true
    }

    /// Resolves once the gate closes for any reason.
    pub async fn stopped(&self) -> StopReason {
        let deadline = self.deadline();
        let at_deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = self.cancel.cancelled() => self.stop(StopReason::Cancelled),
            _ = at_deadline => self.stop(StopReason::Deadline),
        }

        self.reason().unwrap_or(StopReason::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_closes_the_gate() {
        let gate =
            IterationGate::new(None, Some(Duration::from_secs(10)), CancellationToken::new());
        gate.start_at(Instant::now());
        assert!(gate.next());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!gate.next());
        assert_eq!(gate.reason(), Some(StopReason::Deadline));
        assert_eq!(gate.admitted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_fires_at_deadline() {
        let gate =
            IterationGate::new(None, Some(Duration::from_secs(3)), CancellationToken::new());
        let start = Instant::now();
        gate.start_at(start);
        assert_eq!(gate.stopped().await, StopReason::Deadline);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(gate.is_stopped());
    }

    #[test]
    fn iteration_cap_admits_exactly_n() {
        let gate = IterationGate::new(Some(3), None, CancellationToken::new());
        let admitted = (0..10).filter(|_| gate.next()).count();
        assert_eq!(admitted, 3);
        assert_eq!(gate.admitted(), 3);
        assert_eq!(gate.reason(), Some(StopReason::IterationCap));
    }

    #[test]
    fn cancellation_wins_over_later_reasons() {
        let cancel = CancellationToken::new();
        let gate = IterationGate::new(Some(100), None, cancel.clone());
        assert!(gate.next());
        cancel.cancel();
        assert!(!gate.next());
        gate.stop(StopReason::ThresholdAbort);
        assert_eq!(gate.reason(), Some(StopReason::Cancelled));
    }
}
