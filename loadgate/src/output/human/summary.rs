use std::collections::BTreeMap;
use std::fmt::Write as _;

use loadgate_core::metrics::{MetricSeriesSummary, MetricValue, Unit};
use loadgate_core::runner::{RunResult, ThresholdOutcome};

use super::format::*;

pub(crate) fn render(result: &RunResult) -> String {
    let mut out = String::new();

    writeln!(out, "summary").ok();
    match result.abort_reason {
        Some(reason) => writeln!(out, "  state: {} ({reason})", result.state).ok(),
        None => writeln!(out, "  state: {}", result.state).ok(),
    };
    if let Some(stop) = result.stop_reason {
        writeln!(out, "  stopped by: {stop}").ok();
    }
    writeln!(out, "  scenario: {}", result.scenario).ok();
    writeln!(
        out,
        "  duration: {} vus: {}/{}",
        format_duration(result.duration),
        result.vus_started,
        result.vus_max
    )
    .ok();

    let s = &result.statuses;
    writeln!(
        out,
        "  iterations: {} (success {} failure {} error {} aborted {})",
        result.iterations_total, s.success, s.failure, s.error, s.aborted
    )
    .ok();
    writeln!(
        out,
        "  requests: {} rps={}",
        result.requests_total,
        format_rate(result.rps())
    )
    .ok();
    writeln!(
        out,
        "  bytes: recv {} sent {}",
        format_bytes(result.data_received),
        format_bytes(result.data_sent)
    )
    .ok();

    match &result.latency {
        Some(h) => writeln!(
            out,
            "  latency = p50={} p90={} p95={} p99={} mean={} max={} (n={})",
            format_ms_opt(h.p50),
            format_ms_opt(h.p90),
            format_ms_opt(h.p95),
            format_ms_opt(h.p99),
            format_ms_opt(h.mean),
            format_ms_opt(h.max),
            h.count
        )
        .ok(),
        None => writeln!(out, "  latency: n/a").ok(),
    };

    if !result.errors_by_kind.is_empty() {
        let mut kinds = result.errors_by_kind.clone();
        kinds.sort_by(|(a_kind, a), (b_kind, b)| b.cmp(a).then_with(|| a_kind.cmp(b_kind)));
        writeln!(out, "  errors:").ok();
        for (kind, count) in kinds {
            writeln!(out, "    {kind}: {count}").ok();
        }
    }

    render_checks(result, &mut out);
    render_thresholds(result, &mut out);
    render_metrics(&result.metrics, &mut out);

    if !result.errors.is_empty() {
        out.push_str("\nrun errors\n");
        for err in &result.errors {
            writeln!(out, "  {err}").ok();
        }
    }
    if !result.metrics_complete {
        out.push_str("\nwarning: metrics are incomplete for this run\n");
    }

    out
}

fn render_checks(result: &RunResult, out: &mut String) {
    if result.checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for c in &result.checks {
        let status = if c.fails > 0 { "FAIL" } else { "OK" };
        writeln!(
            out,
            "  {}: pass={} fail={} [{status}]",
            c.name, c.passes, c.fails
        )
        .ok();
    }
}

fn render_thresholds(result: &RunResult, out: &mut String) {
    if result.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &result.thresholds {
        let status = match t.outcome {
            ThresholdOutcome::Satisfied => "OK",
            ThresholdOutcome::Violated => "FAIL",
            ThresholdOutcome::Inconclusive => "N/A",
        };
        match t.observed {
            Some(obs) => writeln!(
                out,
                "  {}: {} observed={obs:.3} [{status}]",
                t.metric, t.expression
            )
            .ok(),
            None => writeln!(out, "  {}: {} (no data) [{status}]", t.metric, t.expression).ok(),
        };
    }
    writeln!(
        out,
        "  passed {}/{}",
        result.threshold_count(ThresholdOutcome::Satisfied),
        result.thresholds.len()
    )
    .ok();
}

fn render_metrics(series: &[MetricSeriesSummary], out: &mut String) {
    let mut by_name: BTreeMap<&str, Vec<&MetricSeriesSummary>> = BTreeMap::new();
    for s in series {
        by_name.entry(s.name.as_str()).or_default().push(s);
    }
    if by_name.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    for (_, mut rows) in by_name {
        rows.sort_by(|a, b| a.tags.cmp(&b.tags));
        for s in rows {
            let tags_s = format_tags_inline(&s.tags, &["scenario"]);
            match &s.values {
                MetricValue::Counter(v) if s.unit == Unit::Bytes => {
                    writeln!(out, "  {}{} = {}", s.name, tags_s, format_bytes(*v)).ok();
                }
                MetricValue::Counter(v) => {
                    writeln!(out, "  {}{} = {v}", s.name, tags_s).ok();
                }
                MetricValue::Gauge(v) => {
                    writeln!(out, "  {}{} = {v}", s.name, tags_s).ok();
                }
                MetricValue::Rate { total, hits, rate } => {
                    match rate {
                        Some(rate) => writeln!(
                            out,
                            "  {}{} = hits={hits} total={total} rate={rate:.3}",
                            s.name, tags_s
                        ),
                        None => writeln!(out, "  {}{} = hits={hits} total={total}", s.name, tags_s),
                    }
                    .ok();
                }
                MetricValue::Histogram(h) if s.unit == Unit::Micros => {
                    writeln!(
                        out,
                        "  {}{} = p50={} p90={} p95={} p99={} max={} (n={})",
                        s.name,
                        tags_s,
                        format_ms_opt(h.p50),
                        format_ms_opt(h.p90),
                        format_ms_opt(h.p95),
                        format_ms_opt(h.p99),
                        format_ms_opt(h.max),
                        h.count
                    )
                    .ok();
                }
                MetricValue::Histogram(h) => {
                    let f = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
                    writeln!(
                        out,
                        "  {}{} = p50={} p95={} max={} (n={})",
                        s.name,
                        tags_s,
                        f(h.p50),
                        f(h.p95),
                        f(h.max),
                        h.count
                    )
                    .ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgate_core::metrics::{HistogramSummary, MetricKind};
    use loadgate_core::runner::{
        AbortReason, CheckSummary, RunState, StatusCounts, StopReason, ThresholdResult,
    };
    use std::time::Duration;

    fn latency() -> HistogramSummary {
        HistogramSummary {
            p50: Some(12.0),
            p75: Some(20.0),
            p90: Some(30.0),
            p95: Some(45.5),
            p99: Some(80.0),
            min: Some(1.0),
            max: Some(120.0),
            mean: Some(15.0),
            stdev: Some(4.0),
            count: 100,
        }
    }

    fn result() -> RunResult {
        RunResult {
            scenario: "default".to_string(),
            state: RunState::Completed,
            abort_reason: None,
            stop_reason: Some(StopReason::Deadline),
            duration: Duration::from_secs(10),
            vus_started: 5,
            vus_max: 5,
            iterations_total: 100,
            statuses: StatusCounts {
                success: 98,
                failure: 2,
                error: 0,
                aborted: 0,
            },
            requests_total: 100,
            data_received: 2048,
            data_sent: 1024,
            errors_by_kind: Vec::new(),
            checks: vec![CheckSummary {
                name: "is status 200".to_string(),
                passes: 98,
                fails: 2,
            }],
            thresholds: vec![
                ThresholdResult {
                    metric: "http_req_duration".to_string(),
                    expression: "p(95)<500".to_string(),
                    outcome: ThresholdOutcome::Satisfied,
                    observed: Some(45.5),
                    bound: 500.0,
                },
                ThresholdResult {
                    metric: "http_req_failed".to_string(),
                    expression: "rate<0.01".to_string(),
                    outcome: ThresholdOutcome::Violated,
                    observed: Some(0.02),
                    bound: 0.01,
                },
            ],
            overall_pass: false,
            latency: Some(latency()),
            errors: Vec::new(),
            metrics_complete: true,
            metrics: vec![
                MetricSeriesSummary {
                    name: "data_received".to_string(),
                    kind: MetricKind::Counter,
                    unit: Unit::Bytes,
                    tags: vec![("scenario".to_string(), "default".to_string())],
                    values: MetricValue::Counter(2048),
                },
                MetricSeriesSummary {
                    name: "http_req_duration".to_string(),
                    kind: MetricKind::Histogram,
                    unit: Unit::Micros,
                    tags: vec![("scenario".to_string(), "default".to_string())],
                    values: MetricValue::Histogram(latency()),
                },
            ],
        }
    }

    #[test]
    fn render_includes_totals_checks_and_thresholds() {
        let text = render(&result());
        assert!(text.contains("state: completed"));
        assert!(text.contains("stopped by: deadline"));
        assert!(text.contains("iterations: 100 (success 98 failure 2 error 0 aborted 0)"));
        assert!(text.contains("requests: 100 rps=10"));
        assert!(text.contains("bytes: recv 2.00KiB sent 1.00KiB"));
        assert!(text.contains("p95=45.50ms"));
        assert!(text.contains("is status 200: pass=98 fail=2 [FAIL]"));
        assert!(text.contains("http_req_duration: p(95)<500 observed=45.500 [OK]"));
        assert!(text.contains("http_req_failed: rate<0.01 observed=0.020 [FAIL]"));
        assert!(text.contains("passed 1/2"));
        assert!(text.contains("data_received = 2.00KiB"));
        assert!(!text.contains("warning"));
    }

    #[test]
    fn render_shows_abort_reason_and_missing_data() {
        let mut r = result();
        r.state = RunState::Aborted;
        r.abort_reason = Some(AbortReason::SchedulerFault);
        r.latency = None;
        r.metrics_complete = false;
        r.errors = vec!["vu 3 failed to start".to_string()];
        r.errors_by_kind = vec![("connect".to_string(), 3), ("timeout".to_string(), 7)];
        r.thresholds[0].observed = None;
        r.thresholds[0].outcome = ThresholdOutcome::Inconclusive;

        let text = render(&r);
        assert!(text.contains("state: aborted (scheduler_fault)"));
        assert!(text.contains("latency: n/a"));
        assert!(text.contains("(no data) [N/A]"));
        assert!(text.contains("vu 3 failed to start"));
        assert!(text.contains("metrics are incomplete"));

        let timeout = text.find("timeout: 7").unwrap_or_else(|| panic!("{text}"));
        let connect = text.find("connect: 3").unwrap_or_else(|| panic!("{text}"));
        assert!(timeout < connect);
    }
}
