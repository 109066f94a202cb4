use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::error::{Error, Result};
use super::schedule::RampingU64Schedule;
use super::thresholds::{Threshold, ThresholdSet, compile_thresholds};
use super::workload::{Check, RequestBuilder};

pub const DEFAULT_SCENARIO: &str = "default";
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RampMode {
    /// Each stage holds its target for the whole stage.
    #[default]
    Stepped,
    /// Targets are interpolated linearly from the previous stage's target.
    Linear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProfile {
    Constant {
        vus: u64,
    },
    Ramping {
        start_vus: u64,
        stages: Vec<Stage>,
        ramp: RampMode,
    },
}

/// Workload as supplied by the caller. Validated into a [`RunPlan`] before anything runs.
#[derive(Debug, Clone)]
pub struct WorkloadDefinition {
    pub name: String,
    pub load: LoadProfile,
    pub duration: Option<Duration>,
    /// Shared iteration cap across all VUs.
    pub iterations: Option<u64>,
    pub think_time: Option<Duration>,
    pub graceful_stop: Duration,
    pub request: Option<Arc<dyn RequestBuilder>>,
    pub checks: Vec<Arc<dyn Check>>,
    pub thresholds: Vec<ThresholdSet>,
}

impl Default for WorkloadDefinition {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCENARIO.to_string(),
            load: LoadProfile::Constant { vus: 1 },
            duration: None,
            iterations: None,
            think_time: None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            request: None,
            checks: Vec::new(),
            thresholds: Vec::new(),
        }
    }
}

impl WorkloadDefinition {
    pub fn new(request: impl RequestBuilder + 'static) -> Self {
        Self {
            request: Some(Arc::new(request)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn vus(mut self, vus: u64) -> Self {
        self.load = LoadProfile::Constant { vus };
        self
    }

    #[must_use]
    pub fn stages(mut self, start_vus: u64, stages: Vec<Stage>, ramp: RampMode) -> Self {
        self.load = LoadProfile::Ramping {
            start_vus,
            stages,
            ramp,
        };
        self
    }

    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    #[must_use]
    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }

    #[must_use]
    pub fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    #[must_use]
    pub fn check(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    #[must_use]
    pub fn threshold(mut self, set: ThresholdSet) -> Self {
        self.thresholds.push(set);
        self
    }

    pub fn validate(self) -> Result<RunPlan> {
        let request = self.request.ok_or(Error::MissingRequestBuilder)?;

        if self.iterations == Some(0) {
            return Err(Error::InvalidIterations);
        }

        let (work, max_vus, deadline) = match self.load {
            LoadProfile::Constant { vus } => {
                if vus == 0 {
                    return Err(Error::InvalidVus);
                }
                if self.duration.is_some_and(|d| d.is_zero()) {
                    return Err(Error::InvalidDuration);
                }
                if self.duration.is_none() && self.iterations.is_none() {
                    return Err(Error::MissingStopCondition);
                }
                (PlanWork::Constant { vus }, vus, self.duration)
            }
            LoadProfile::Ramping {
                start_vus,
                stages,
                ramp,
            } => {
                if stages.is_empty() {
                    return Err(Error::InvalidStages);
                }
                let schedule = RampingU64Schedule::new(start_vus, stages, ramp);
                if schedule.total_duration().is_zero() {
                    return Err(Error::InvalidStages);
                }
                let max_vus = schedule.max_target();
                if max_vus == 0 {
                    return Err(Error::InvalidVus);
                }
                let total = schedule.total_duration();
                // An explicit duration can only cut the ramp short.
                let deadline = match self.duration {
                    Some(d) if d.is_zero() => return Err(Error::InvalidDuration),
                    Some(d) => d.min(total),
                    None => total,
                };
                (
                    PlanWork::Ramping {
                        schedule: Arc::new(schedule),
                    },
                    max_vus,
                    Some(deadline),
                )
            }
        };

        let mut seen = HashSet::new();
        let mut check_names: Vec<Arc<str>> = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let name = check.name();
            if !seen.insert(name.to_string()) {
                return Err(Error::DuplicateCheck(name.to_string()));
            }
            check_names.push(Arc::from(name));
        }

        let thresholds = compile_thresholds(&self.thresholds)?;

        Ok(RunPlan {
            name: Arc::from(self.name),
            work,
            max_vus,
            deadline,
            iterations: self.iterations,
            think_time: self.think_time.filter(|d| !d.is_zero()),
            graceful_stop: self.graceful_stop,
            request,
            checks: self.checks.into(),
            check_names: check_names.into(),
            thresholds,
        })
    }
}

#[derive(Debug, Clone)]
pub enum PlanWork {
    Constant { vus: u64 },
    Ramping { schedule: Arc<RampingU64Schedule> },
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: Arc<str>,
    pub work: PlanWork,
    /// Number of VUs spawned for the run.
    pub max_vus: u64,
    /// Run duration measured from the start signal.
    pub deadline: Option<Duration>,
    pub iterations: Option<u64>,
    pub think_time: Option<Duration>,
    pub graceful_stop: Duration,
    pub request: Arc<dyn RequestBuilder>,
    pub checks: Arc<[Arc<dyn Check>]>,
    pub check_names: Arc<[Arc<str>]>,
    pub thresholds: Vec<Threshold>,
}

impl RunPlan {
    pub fn schedule(&self) -> Option<&Arc<RampingU64Schedule>> {
        match &self.work {
            PlanWork::Ramping { schedule } => Some(schedule),
            PlanWork::Constant { .. } => None,
        }
    }
}
