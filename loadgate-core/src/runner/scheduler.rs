use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Barrier;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::RunPlan;
use super::error::{Error, Result};
use super::executor::{IterationExecutor, panic_message};
use super::gate::{IterationGate, StopReason};
use super::sample::Sample;
use super::schedule::RampingU64Schedule;
use super::sink::MetricSink;
use super::transport::Transport;
use super::vu::{StartSignal, VirtualUser, VuState};

/// What the scheduler observed while running.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub vus_started: u64,
    pub reason: StopReason,
    /// Iterations still in flight when the grace period expired.
    pub abandoned: u64,
    /// VU tasks that died outside an iteration.
    pub faults: Vec<String>,
    pub elapsed: Duration,
}

/// Owns the VU pool of one run.
pub struct VuScheduler<T> {
    plan: Arc<RunPlan>,
    transport: Arc<T>,
    sink: Arc<MetricSink>,
    cancel: CancellationToken,
}

struct VuTask<T> {
    vu: Arc<VirtualUser>,
    plan: Arc<RunPlan>,
    transport: Arc<T>,
    sink: Arc<MetricSink>,
    gate: Arc<IterationGate>,
    init_error: Arc<Mutex<Option<String>>>,
    ready_barrier: Arc<Barrier>,
    start_signal: Arc<StartSignal>,
    run_started: Arc<OnceLock<Instant>>,
    vus_started: Arc<AtomicU64>,
}

impl<T: Transport> VuScheduler<T> {
    pub fn new(
        plan: Arc<RunPlan>,
        transport: Arc<T>,
        sink: Arc<MetricSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            transport,
            sink,
            cancel,
        }
    }

    /// Spawns every VU, waits for all of them to initialise, then opens the gate.
    ///
    /// A VU that fails to initialise is a scheduler fault: nothing runs and no sample is
    /// recorded.
    pub async fn start(self) -> Result<RunningScheduler> {
        let plan = self.plan;
        let max_vus = plan.max_vus;
        let gate = Arc::new(IterationGate::new(
            plan.iterations,
            plan.deadline,
            self.cancel.clone(),
        ));

        let init_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let vu_count = usize::try_from(max_vus).unwrap_or(usize::MAX);
        let ready_barrier = Arc::new(Barrier::new(vu_count.saturating_add(1)));
        let start_signal = Arc::new(StartSignal::new());
        let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());
        let vus_started = Arc::new(AtomicU64::new(0));

        self.sink.set_vus_max(max_vus);

        let mut vus = Vec::with_capacity(vu_count);
        let mut tasks = JoinSet::new();
        for id in 1..=max_vus {
            let vu = Arc::new(VirtualUser::new(id));
            vus.push(vu.clone());
            tasks.spawn(run_vu(VuTask {
                vu,
                plan: plan.clone(),
                transport: self.transport.clone(),
                sink: self.sink.clone(),
                gate: gate.clone(),
                init_error: init_error.clone(),
                ready_barrier: ready_barrier.clone(),
                start_signal: start_signal.clone(),
                run_started: run_started.clone(),
                vus_started: vus_started.clone(),
            }));
        }

        // VU initialisation stays out of the measured run.
        ready_barrier.wait().await;

        let init_err = init_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        if let Some(err) = init_err {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            tracing::error!(error = %err, "VU initialisation failed");
            return Err(Error::SchedulerFault(err));
        }

        let started = Instant::now();
        let _ = run_started.set(started);
        gate.start_at(started);
        start_signal.start();
        tracing::debug!(vus = max_vus, "all VUs released");

        Ok(RunningScheduler {
            gate,
            vus,
            tasks,
            sink: self.sink,
            started,
            graceful_stop: plan.graceful_stop,
            vus_started,
            faults: Vec::new(),
        })
    }

    /// Runs to completion without observing intermediate states.
    pub async fn run(self) -> Result<SchedulerOutcome> {
        let mut running = self.start().await?;
        running.wait_for_stop().await;
        Ok(running.drain().await)
    }
}

/// A scheduler whose VUs have been released.
pub struct RunningScheduler {
    gate: Arc<IterationGate>,
    vus: Vec<Arc<VirtualUser>>,
    tasks: JoinSet<()>,
    sink: Arc<MetricSink>,
    started: Instant,
    graceful_stop: Duration,
    vus_started: Arc<AtomicU64>,
    faults: Vec<String>,
}

enum Event {
    Stopped(StopReason),
    Joined(Option<std::result::Result<(), JoinError>>),
}

impl RunningScheduler {
    pub fn gate(&self) -> &Arc<IterationGate> {
        &self.gate
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Resolves when admission stops: the gate closed, or every VU finished on its own.
    pub async fn wait_for_stop(&mut self) -> StopReason {
        loop {
            let gate = self.gate.clone();
            let event = tokio::select! {
                reason = gate.stopped() => Event::Stopped(reason),
                joined = self.tasks.join_next() => Event::Joined(joined),
            };

            match event {
                Event::Stopped(reason) => return reason,
                Event::Joined(Some(res)) => self.collect(res),
                Event::Joined(None) => {
                    // Ramp finished before the gate noticed.
                    self.gate.stop(StopReason::Deadline);
                    return self.gate.reason().unwrap_or(StopReason::Deadline);
                }
            }
        }
    }

    /// Waits for in-flight iterations, bounded by the grace period. Iterations still running
    /// afterwards are recorded as aborted.
    pub async fn drain(mut self) -> SchedulerOutcome {
        let reason = match self.gate.reason() {
            Some(r) => r,
            None => {
                self.gate.stop(StopReason::Cancelled);
                self.gate.reason().unwrap_or(StopReason::Cancelled)
            }
        };

        let mut tasks = std::mem::take(&mut self.tasks);
        let mut faults = std::mem::take(&mut self.faults);
        let drained = tokio::time::timeout(self.graceful_stop, async {
            while let Some(res) = tasks.join_next().await {
                collect_join(&mut faults, res);
            }
        })
        .await;

        let mut abandoned = 0u64;
        if drained.is_err() {
            let now = self.started.elapsed();
            for vu in &self.vus {
                if let Some(started_at) = vu.abandon() {
                    let in_flight = now.saturating_sub(started_at);
                    tracing::warn!(vu = vu.id(), ?in_flight, "abandoning iteration after grace period");
                    self.sink
                        .record(&Sample::aborted(vu.id(), started_at, in_flight));
                    abandoned += 1;
                }
            }

            tasks.abort_all();
            while let Some(res) = tasks.join_next().await {
                collect_join(&mut faults, res);
            }
        }

        for vu in &self.vus {
            if vu.set_state(VuState::Stopped) == VuState::Running {
                self.sink.add_vus(vu.id(), -1);
            }
        }

        SchedulerOutcome {
            vus_started: self.vus_started.load(Ordering::Acquire),
            reason,
            abandoned,
            faults,
            elapsed: self.started.elapsed(),
        }
    }

    fn collect(&mut self, res: std::result::Result<(), JoinError>) {
        collect_join(&mut self.faults, res);
    }
}

fn collect_join(faults: &mut Vec<String>, res: std::result::Result<(), JoinError>) {
    match res {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) => {
            let msg = match err.try_into_panic() {
                Ok(payload) => format!("VU task panicked: {}", panic_message(payload.as_ref())),
                Err(err) => format!("VU task failed: {err}"),
            };
            tracing::error!(error = %msg, "VU task fault");
            faults.push(msg);
        }
    }
}

async fn run_vu<T: Transport>(task: VuTask<T>) {
    let vu = task.vu.clone();
    let id = vu.id();

    let prepared = AssertUnwindSafe(task.transport.prepare_vu(id))
        .catch_unwind()
        .await;
    let init_err = match prepared {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("VU {id}: {err}")),
        Err(payload) => Some(format!("VU {id}: panicked: {}", panic_message(payload.as_ref()))),
    };

    if let Some(msg) = init_err {
        {
            let mut guard = task
                .init_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.is_none() {
                *guard = Some(msg);
            }
        }
        task.ready_barrier.wait().await;
        return;
    }

    task.ready_barrier.wait().await;
    task.start_signal.wait().await;
    task.vus_started.fetch_add(1, Ordering::AcqRel);

    let started = task
        .run_started
        .get()
        .copied()
        .unwrap_or_else(Instant::now);
    let exec = IterationExecutor::new(&task.plan, task.transport.clone(), task.sink.clone(), started);
    let think_time = task.plan.think_time;
    tracing::trace!(vu = id, "VU started");

    match task.plan.schedule() {
        None => {
            set_running(&vu, &task.sink);
            let mut iteration = 0u64;
            while task.gate.next() {
                if !exec.execute_and_record(&vu, iteration).await {
                    break;
                }
                iteration += 1;
                think(&task.gate, think_time).await;
            }
        }
        Some(schedule) => ramping_loop(&vu, &exec, &task.gate, schedule, started, think_time).await,
    }

    if vu.set_state(VuState::Stopped) == VuState::Running {
        task.sink.add_vus(id, -1);
    }
    tracing::trace!(vu = id, "VU stopped");
}

async fn ramping_loop<T: Transport>(
    vu: &VirtualUser,
    exec: &IterationExecutor<T>,
    gate: &IterationGate,
    schedule: &RampingU64Schedule,
    started: Instant,
    think_time: Option<Duration>,
) {
    let mut iteration = 0u64;
    loop {
        if gate.is_stopped() {
            break;
        }

        let elapsed = started.elapsed();
        if schedule.is_done(elapsed) {
            break;
        }

        if vu.id() > schedule.target_at(elapsed) {
            if vu.set_state(VuState::Idle) == VuState::Running {
                exec.sink().add_vus(vu.id(), -1);
            }
            let wait = schedule.next_recheck_in(elapsed, vu.id());
            tokio::select! {
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                _ = gate.stopped() => {}
            }
            continue;
        }

        set_running(vu, exec.sink());
        if !gate.next() {
            break;
        }
        if !exec.execute_and_record(vu, iteration).await {
            break;
        }
        iteration += 1;
        think(gate, think_time).await;
    }
}

fn set_running(vu: &VirtualUser, sink: &MetricSink) {
    if vu.set_state(VuState::Running) != VuState::Running {
        sink.add_vus(vu.id(), 1);
    }
}

async fn think(gate: &IterationGate, think_time: Option<Duration>) {
    let Some(d) = think_time else {
        return;
    };
    tokio::select! {
        _ = tokio::time::sleep(d) => {}
        _ = gate.stopped() => {}
    }
}
