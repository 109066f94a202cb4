mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadgate_core::runner::{
    AbortReason, Error, ProgressUpdate, RampMode, RunController, RunState, Stage, StatusCheck,
    StopReason, ThresholdOutcome, ThresholdSet,
};
use tokio::time::Instant;

use support::{StubTransport, stub, workload};

fn controller(def: loadgate_core::WorkloadDefinition) -> RunController {
    RunController::new(def).unwrap_or_else(|e| panic!("invalid workload: {e}"))
}

#[tokio::test(start_paused = true)]
async fn constant_load_with_fast_backend_passes() {
    let transport = stub(200, Duration::from_millis(50));
    let run = controller(
        workload()
            .vus(100)
            .duration(Duration::from_secs(10))
            .check(StatusCheck::new(200))
            .threshold(ThresholdSet::new("http_req_duration", ["p(95)<500"])),
    );

    let started = Instant::now();
    let result = run.run(transport.clone()).await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.stop_reason, Some(StopReason::Deadline));
    assert_eq!(result.vus_started, 100);
    assert!(result.overall_pass);
    assert!(result.metrics_complete);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    // 100 VUs, back-to-back 50ms iterations for 10s.
    assert!(
        (19_900..=20_000).contains(&result.iterations_total),
        "iterations={}",
        result.iterations_total
    );
    assert_eq!(result.iterations_total, transport.calls());
    assert_eq!(result.statuses.success, result.iterations_total);
    let last_send = transport
        .last_send()
        .unwrap_or_else(|| panic!("no request was sent"));
    assert!(last_send < started + Duration::from_secs(10));

    let t = &result.thresholds[0];
    assert_eq!(t.outcome, ThresholdOutcome::Satisfied);
    let observed = t.observed.unwrap_or_else(|| panic!("expected observed p95"));
    assert!((observed - 50.0).abs() < 1.0, "p95={observed}");

    assert_eq!(result.checks.len(), 1);
    assert_eq!(result.checks[0].passes, result.iterations_total);
    assert_eq!(result.checks[0].fails, 0);
}

#[tokio::test(start_paused = true)]
async fn server_errors_fail_checks_but_not_latency_thresholds() {
    let transport = stub(500, Duration::from_millis(50));
    let result = controller(
        workload()
            .vus(10)
            .duration(Duration::from_secs(2))
            .check(StatusCheck::new(200))
            .threshold(ThresholdSet::new("http_req_duration", ["p(95)<500"])),
    )
    .run(transport)
    .await;

    assert_eq!(result.state, RunState::Completed);
    assert!(result.overall_pass);
    assert!(result.checks_failed());
    assert_eq!(result.checks[0].passes, 0);
    assert_eq!(result.checks[0].fails, result.iterations_total);
    assert_eq!(result.statuses.failure, result.iterations_total);
}

#[test]
fn invalid_configuration_fails_before_running() {
    let zero_vus = RunController::new(workload().vus(0).duration(Duration::from_secs(10)));
    assert!(matches!(zero_vus, Err(Error::InvalidVus)));

    let zero_duration = RunController::new(workload().vus(100).duration(Duration::ZERO));
    assert!(matches!(zero_duration, Err(Error::InvalidDuration)));

    let bad_threshold = RunController::new(
        workload()
            .duration(Duration::from_secs(1))
            .threshold(ThresholdSet::new("http_req_duration", ["p95 < 500"])),
    );
    assert!(matches!(bad_threshold, Err(Error::InvalidThreshold { .. })));

    let rate_on_counter = RunController::new(
        workload()
            .duration(Duration::from_secs(1))
            .threshold(ThresholdSet::new("http_reqs", ["rate>1"])),
    );
    assert!(matches!(
        rate_on_counter,
        Err(Error::InvalidThreshold { ref metric, .. }) if metric == "http_reqs"
    ));
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_and_aborts() {
    let transport = stub(200, Duration::from_millis(50));
    let run = controller(workload().vus(100).duration(Duration::from_secs(10)));
    let cancel = run.cancel_token();
    let mut states = run.subscribe();

    let started = Instant::now();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    });

    let result = run.run(transport.clone()).await;

    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::Cancelled));
    assert_eq!(*states.borrow_and_update(), RunState::Aborted);
    assert!(started.elapsed() <= Duration::from_millis(2_100));
    assert!(
        (3_900..=4_100).contains(&result.iterations_total),
        "iterations={}",
        result.iterations_total
    );
    // In-flight iterations were allowed to finish and were recorded.
    assert_eq!(result.iterations_total, transport.calls());
    assert_eq!(result.statuses.aborted, 0);
    assert!(result.metrics_complete);
}

#[tokio::test(start_paused = true)]
async fn iterations_past_the_grace_period_are_aborted() {
    let transport = stub(200, Duration::from_secs(60));
    let result = controller(
        workload()
            .vus(5)
            .duration(Duration::from_secs(1))
            .graceful_stop(Duration::from_secs(2)),
    )
    .run(transport)
    .await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.iterations_total, 5);
    assert_eq!(result.statuses.aborted, 5);
    assert_eq!(result.statuses.success, 0);
    assert!(
        result.duration >= Duration::from_secs(3) && result.duration < Duration::from_millis(3_100),
        "duration={:?}",
        result.duration
    );
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn iteration_cap_is_shared_across_vus() {
    let transport = stub(200, Duration::from_millis(10));
    let result = controller(workload().vus(10).iterations(25))
        .run(transport.clone())
        .await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.stop_reason, Some(StopReason::IterationCap));
    assert_eq!(result.iterations_total, 25);
    assert_eq!(transport.calls(), 25);
}

#[tokio::test(start_paused = true)]
async fn failing_vu_initialisation_aborts_the_run() {
    let run = controller(workload().vus(5).duration(Duration::from_secs(5)));
    let states = run.subscribe();
    assert_eq!(*states.borrow(), RunState::Configuring);
    let transport = Arc::new(StubTransport {
        fail_prepare_for: Some(3),
        state: Some(states.clone()),
        ..StubTransport::new(200, Duration::from_millis(10))
    });
    let result = run.run(transport.clone()).await;

    // VUs are prepared while Running, so the fault aborts a running run.
    let seen = transport.states_at_prepare();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|s| *s == RunState::Running), "{seen:?}");
    assert_eq!(*states.borrow(), RunState::Aborted);
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::SchedulerFault));
    assert!(!result.metrics_complete);
    assert_eq!(result.iterations_total, 0);
    assert_eq!(transport.calls(), 0);
    assert!(
        result.errors[0].contains("connection pool exhausted"),
        "{:?}",
        result.errors
    );
}

#[tokio::test(start_paused = true)]
async fn abort_on_fail_threshold_stops_the_run() {
    let transport = stub(503, Duration::from_millis(100));
    let result = controller(
        workload()
            .vus(4)
            .duration(Duration::from_secs(30))
            .threshold(ThresholdSet::new("http_req_failed", ["rate<0.1"]).abort_on_fail()),
    )
    .run(transport)
    .await;

    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::Threshold));
    assert!(!result.overall_pass);
    assert!(result.duration < Duration::from_secs(3));
    assert!(result.errors[0].contains("http_req_failed"));
}

#[tokio::test(start_paused = true)]
async fn stepped_ramp_follows_stage_targets() {
    let transport = stub(200, Duration::from_millis(100));
    let stages = vec![
        Stage {
            duration: Duration::from_secs(2),
            target: 5,
        },
        Stage {
            duration: Duration::from_secs(2),
            target: 10,
        },
    ];
    let result = controller(workload().stages(0, stages, RampMode::Stepped))
        .run(transport)
        .await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.vus_max, 10);
    assert_eq!(result.vus_started, 10);
    // 5 VUs x 20 iterations, then 10 VUs x 20 iterations.
    assert!(
        (290..=300).contains(&result.iterations_total),
        "iterations={}",
        result.iterations_total
    );
}

#[tokio::test(start_paused = true)]
async fn linear_ramp_adds_vus_gradually() {
    let transport = stub(200, Duration::from_millis(100));
    let stages = vec![
        Stage {
            duration: Duration::from_secs(2),
            target: 10,
        },
        Stage {
            duration: Duration::from_secs(2),
            target: 10,
        },
    ];
    let active: Arc<Mutex<Vec<(Duration, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = active.clone();
    let result = controller(workload().stages(0, stages, RampMode::Linear))
        .with_progress(Arc::new(move |u: ProgressUpdate| {
            seen.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((u.elapsed, u.active_vus));
        }))
        .run(transport)
        .await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.vus_max, 10);
    assert_eq!(result.vus_started, 10);
    // VU k joins at k * 200ms and runs 100ms iterations until 4s: sum of (40 - 2k).
    assert!(
        (270..=292).contains(&result.iterations_total),
        "iterations={}",
        result.iterations_total
    );

    let active = active
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    let at_one_second = active
        .iter()
        .find(|(elapsed, _)| *elapsed >= Duration::from_secs(1))
        .map(|(_, vus)| *vus)
        .unwrap_or_else(|| panic!("no progress after 1s: {active:?}"));
    assert!((4..=5).contains(&at_one_second), "{active:?}");
    let ramping: Vec<u64> = active
        .iter()
        .filter(|(elapsed, _)| *elapsed < Duration::from_secs(4))
        .map(|(_, vus)| *vus)
        .collect();
    assert!(
        ramping.windows(2).all(|w| w[0] <= w[1]),
        "active VUs should only grow while ramping: {active:?}"
    );
    let at_three_seconds = active
        .iter()
        .find(|(elapsed, _)| *elapsed >= Duration::from_secs(3))
        .map(|(_, vus)| *vus);
    assert_eq!(at_three_seconds, Some(10), "{active:?}");
}

#[tokio::test(start_paused = true)]
async fn think_time_spaces_iterations() {
    let transport = stub(200, Duration::ZERO);
    let result = controller(
        workload()
            .vus(1)
            .duration(Duration::from_secs(1))
            .think_time(Duration::from_millis(100)),
    )
    .run(transport)
    .await;

    assert_eq!(result.iterations_total, 10);
}

#[tokio::test(start_paused = true)]
async fn zero_iterations_leave_thresholds_inconclusive() {
    let transport = Arc::new(StubTransport {
        fail_prepare_for: Some(1),
        ..StubTransport::new(200, Duration::ZERO)
    });
    let result = controller(
        workload()
            .vus(1)
            .duration(Duration::from_secs(1))
            .threshold(ThresholdSet::new("http_req_duration", ["p(95)<500"])),
    )
    .run(transport)
    .await;

    assert_eq!(result.thresholds[0].outcome, ThresholdOutcome::Inconclusive);
    assert!(!result.overall_pass);
}
