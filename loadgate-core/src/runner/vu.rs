use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl Default for StartSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StartSignal {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.started.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum VuState {
    /// Spawned but not admitted by the load profile.
    Idle,
    Running,
    Stopped,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => VuState::Running,
            2 => VuState::Stopped,
            _ => VuState::Idle,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            VuState::Idle => 0,
            VuState::Running => 1,
            VuState::Stopped => 2,
        }
    }
}

const SLOT_IDLE: u8 = 0;
const SLOT_IN_FLIGHT: u8 = 1;
const SLOT_ABANDONED: u8 = 2;

/// Scheduler-side handle of one VU.
///
/// The VU task and the scheduler share exactly this struct. The in-flight slot decides
/// who records an iteration: the VU when it finishes in time, the scheduler when the
/// grace period expires first. Whoever loses the compare-and-swap records nothing.
#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    state: AtomicU8,
    slot: AtomicU8,
    /// Start of the current iteration, as nanoseconds since the run start.
    iteration_started: AtomicU64,
}

impl VirtualUser {
    /// `id` is 1-based.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(VuState::Idle.to_u8()),
            slot: AtomicU8::new(SLOT_IDLE),
            iteration_started: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the previous state.
    pub fn set_state(&self, state: VuState) -> VuState {
        VuState::from_u8(self.state.swap(state.to_u8(), Ordering::AcqRel))
    }

    /// Marks an iteration as in flight. Fails once the scheduler has abandoned this VU.
    pub(crate) fn begin_iteration(&self, started_at: Duration) -> bool {
        let nanos = started_at.as_nanos().min(u64::MAX as u128) as u64;
        self.iteration_started.store(nanos, Ordering::Relaxed);
        self.slot
            .compare_exchange(SLOT_IDLE, SLOT_IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True when the VU still owns the iteration and must record its sample.
    pub(crate) fn finish_iteration(&self) -> bool {
        self.slot
            .compare_exchange(SLOT_IN_FLIGHT, SLOT_IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Takes over an in-flight iteration. Returns its start offset when there was one.
    pub(crate) fn abandon(&self) -> Option<Duration> {
        match self.slot.swap(SLOT_ABANDONED, Ordering::AcqRel) {
            SLOT_IN_FLIGHT => Some(Duration::from_nanos(
                self.iteration_started.load(Ordering::Relaxed),
            )),
            _ => None,
        }
    }
}
