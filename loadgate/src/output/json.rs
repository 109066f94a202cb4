use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use loadgate_core::metrics::{HistogramSummary, MetricValue};
use loadgate_core::runner::{
    ProgressFn, ProgressUpdate, RunPlan, RunResult, ScenarioProgress, ThresholdResult,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _workload_path: Option<&Path>, _plan: &RunPlan) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        let line = build_summary_line(result);
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenario: String,
    pub active_vus: u64,
    pub max_vus: u64,
    pub target_vus: u64,
    pub stage: Option<usize>,

    pub requests_per_sec: f64,
    pub iterations_per_sec: f64,
    pub error_rate: f64,

    pub total_requests: u64,
    pub total_iterations: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,

    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    let (target_vus, stage) = match &u.progress {
        ScenarioProgress::ConstantVus { vus, .. } => (*vus, None),
        ScenarioProgress::RampingVus { stage, .. } => (
            stage.as_ref().map_or(0, |s| s.current_target),
            stage.as_ref().map(|s| s.stage),
        ),
    };

    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenario: u.scenario.clone(),
        active_vus: u.active_vus,
        max_vus: u.max_vus,
        target_vus,
        stage,

        requests_per_sec: u.metrics.rps_now,
        iterations_per_sec: u.metrics.iterations_per_sec_now,
        error_rate: u.metrics.error_rate_now,

        total_requests: u.metrics.requests_total,
        total_iterations: u.metrics.iterations_total,
        failed_requests_total: u.metrics.failed_requests_total,
        checks_failed_total: u.metrics.checks_failed_total,
        total_bytes_received: u.metrics.bytes_received_total,
        total_bytes_sent: u.metrics.bytes_sent_total,

        latency_p50_ms: u.metrics.latency_p50_ms,
        latency_p95_ms: u.metrics.latency_p95_ms,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub state: String,
    pub abort_reason: Option<String>,
    pub stop_reason: Option<String>,
    pub duration_secs: f64,
    pub vus_started: u64,
    pub vus_max: u64,

    pub iterations_total: u64,
    pub statuses: JsonStatuses,
    pub requests_total: u64,
    pub requests_per_sec: f64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub errors_by_kind: BTreeMap<String, u64>,

    pub latency: Option<JsonLatencySummary>,
    pub checks: Vec<JsonCheck>,
    pub thresholds: Vec<JsonThreshold>,
    pub overall_pass: bool,

    pub errors: Vec<String>,
    pub metrics_complete: bool,
    pub metrics: Vec<JsonMetric>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonStatuses {
    pub success: u64,
    pub failure: u64,
    pub error: u64,
    pub aborted: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLatencySummary {
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

impl From<&HistogramSummary> for JsonLatencySummary {
    fn from(h: &HistogramSummary) -> Self {
        Self {
            p50: h.p50,
            p75: h.p75,
            p90: h.p90,
            p95: h.p95,
            p99: h.p99,
            min: h.min,
            max: h.max,
            mean: h.mean,
            stdev: h.stdev,
            count: h.count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub outcome: &'static str,
    pub observed: Option<f64>,
    pub bound: f64,
}

impl From<&ThresholdResult> for JsonThreshold {
    fn from(t: &ThresholdResult) -> Self {
        Self {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            outcome: t.outcome.into(),
            observed: t.observed,
            bound: t.bound,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    pub kind: String,
    pub unit: String,
    pub tags: BTreeMap<String, String>,
    pub values: serde_json::Value,
}

fn metric_values(v: &MetricValue) -> serde_json::Value {
    match v {
        MetricValue::Counter(n) => serde_json::json!({ "value": n }),
        MetricValue::Gauge(n) => serde_json::json!({ "value": n }),
        MetricValue::Rate { total, hits, rate } => {
            serde_json::json!({ "total": total, "hits": hits, "rate": rate })
        }
        MetricValue::Histogram(h) => {
            serde_json::to_value(JsonLatencySummary::from(h)).unwrap_or(serde_json::Value::Null)
        }
    }
}

fn build_summary_line(r: &RunResult) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        scenario: r.scenario.clone(),
        state: r.state.to_string(),
        abort_reason: r.abort_reason.map(|a| a.to_string()),
        stop_reason: r.stop_reason.map(|s| s.to_string()),
        duration_secs: r.duration.as_secs_f64(),
        vus_started: r.vus_started,
        vus_max: r.vus_max,

        iterations_total: r.iterations_total,
        statuses: JsonStatuses {
            success: r.statuses.success,
            failure: r.statuses.failure,
            error: r.statuses.error,
            aborted: r.statuses.aborted,
        },
        requests_total: r.requests_total,
        requests_per_sec: r.rps(),
        bytes_received_total: r.data_received,
        bytes_sent_total: r.data_sent,
        errors_by_kind: r.errors_by_kind.iter().cloned().collect(),

        latency: r.latency.as_ref().map(JsonLatencySummary::from),
        checks: r
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        thresholds: r.thresholds.iter().map(JsonThreshold::from).collect(),
        overall_pass: r.overall_pass,

        errors: r.errors.clone(),
        metrics_complete: r.metrics_complete,
        metrics: r
            .metrics
            .iter()
            .map(|m| JsonMetric {
                name: m.name.clone(),
                kind: m.kind.to_string(),
                unit: m.unit.to_string(),
                tags: m.tags.iter().cloned().collect(),
                values: metric_values(&m.values),
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgate_core::metrics::{MetricKind, MetricSeriesSummary, Unit};
    use loadgate_core::runner::{
        CheckSummary, LiveMetrics, RunState, StageProgress, StatusCounts, StopReason,
        ThresholdOutcome,
    };
    use serde_json::Value;
    use std::time::Duration;

    fn to_value<T: Serialize>(line: &T) -> Value {
        match serde_json::to_value(line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        }
    }

    #[test]
    fn progress_line_reports_stage_target() {
        let update = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            scenario: "ramp".to_string(),
            active_vus: 4,
            max_vus: 10,
            metrics: LiveMetrics {
                rps_now: 40.0,
                requests_total: 120,
                ..LiveMetrics::default()
            },
            progress: ScenarioProgress::RampingVus {
                total_duration: Duration::from_secs(10),
                stage: Some(StageProgress {
                    stage: 1,
                    stages: 2,
                    stage_elapsed: Duration::from_secs(3),
                    stage_remaining: Duration::from_secs(2),
                    start_target: 0,
                    end_target: 10,
                    current_target: 6,
                }),
            },
        };

        let v = to_value(&build_progress_line(&update));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("target_vus").and_then(Value::as_u64), Some(6));
        assert_eq!(v.get("stage").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("total_requests").and_then(Value::as_u64), Some(120));
        assert!(v.get("latency_p95_ms").is_some_and(Value::is_null));
    }

    #[test]
    fn summary_line_carries_result_fields() {
        let result = RunResult {
            scenario: "s1".to_string(),
            state: RunState::Completed,
            abort_reason: None,
            stop_reason: Some(StopReason::IterationCap),
            duration: Duration::from_secs(2),
            vus_started: 2,
            vus_max: 2,
            iterations_total: 10,
            statuses: StatusCounts {
                success: 10,
                ..StatusCounts::default()
            },
            requests_total: 10,
            data_received: 3,
            data_sent: 4,
            errors_by_kind: vec![("timeout".to_string(), 1)],
            checks: vec![CheckSummary {
                name: "c1".to_string(),
                passes: 4,
                fails: 6,
            }],
            thresholds: vec![ThresholdResult {
                metric: "http_reqs".to_string(),
                expression: "count>5".to_string(),
                outcome: ThresholdOutcome::Satisfied,
                observed: Some(10.0),
                bound: 5.0,
            }],
            overall_pass: true,
            latency: None,
            errors: Vec::new(),
            metrics_complete: true,
            metrics: vec![MetricSeriesSummary {
                name: "http_reqs".to_string(),
                kind: MetricKind::Counter,
                unit: Unit::Count,
                tags: vec![("status".to_string(), "200".to_string())],
                values: MetricValue::Counter(10),
            }],
        };

        let v = to_value(&build_summary_line(&result));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("state").and_then(Value::as_str), Some("completed"));
        assert_eq!(
            v.get("stop_reason").and_then(Value::as_str),
            Some("iteration_cap")
        );
        assert_eq!(v.get("requests_per_sec").and_then(Value::as_f64), Some(5.0));
        assert_eq!(
            v.pointer("/checks/0/fails").and_then(Value::as_u64),
            Some(6)
        );
        assert_eq!(
            v.pointer("/thresholds/0/outcome").and_then(Value::as_str),
            Some("satisfied")
        );
        assert_eq!(
            v.pointer("/errors_by_kind/timeout").and_then(Value::as_u64),
            Some(1)
        );
        assert_eq!(
            v.pointer("/metrics/0/values/value").and_then(Value::as_u64),
            Some(10)
        );
        assert_eq!(
            v.pointer("/metrics/0/tags/status").and_then(Value::as_str),
            Some("200")
        );
    }
}
