use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use loadgate_core::runner::{
    PlanWork, ProgressFn, ProgressUpdate, RunPlan, RunResult, ScenarioProgress,
};
use progress::HumanProgress;
use summary::render;

use crate::output::human::format::*;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, workload_path: Option<&Path>, plan: &RunPlan) {
        if let Some(path) = workload_path {
            println!("workload: {}", path.display());
        }
        let load = match &plan.work {
            PlanWork::Constant { vus } => format!("vus={vus}"),
            PlanWork::Ramping { schedule } => format!(
                "stages={} max_vus={} ramp={}",
                schedule.stages().len(),
                plan.max_vus,
                schedule.mode()
            ),
        };
        println!(
            "scenario: {} {load} iterations={:?} duration={:?} thresholds={}",
            plan.name,
            plan.iterations,
            plan.deadline,
            plan.thresholds.len()
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u: ProgressUpdate| {
            let m = &u.metrics;
            let rates = format!(
                " iters/s={} rps={} err={:.1}% p95={} checks_failed={}",
                format_rate(m.iterations_per_sec_now),
                format_rate(m.rps_now),
                m.error_rate_now * 100.0,
                format_ms_opt(m.latency_p95_ms),
                m.checks_failed_total
            );

            let (total, message) = match &u.progress {
                ScenarioProgress::ConstantVus { vus, duration, .. } => (
                    *duration,
                    format!(
                        "vus={}/{vus} elapsed={}{}",
                        u.active_vus,
                        format_duration(u.elapsed),
                        rates
                    ),
                ),
                ScenarioProgress::RampingVus {
                    total_duration,
                    stage,
                } => {
                    let msg = match stage {
                        Some(stage) => format!(
                            "stage={}/{} vus={}/{} elapsed={} stage_remaining={}{}",
                            stage.stage,
                            stage.stages,
                            u.active_vus,
                            stage.current_target,
                            format_duration(u.elapsed),
                            format_duration(stage.stage_remaining),
                            rates
                        ),
                        None => format!(
                            "vus={} elapsed={}{}",
                            u.active_vus,
                            format_duration(u.elapsed),
                            rates
                        ),
                    };
                    (Some(*total_duration), msg)
                }
            };

            progress.update(&u.scenario, total, u.elapsed, message);
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(result));

        let failed: Vec<_> = result.thresholds.iter().filter(|t| !t.passed()).collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no data)", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}
