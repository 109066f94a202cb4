use std::time::Duration;

use super::config::{RampMode, Stage};

#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Target VU count over time for a ramp profile.
#[derive(Debug, Clone)]
pub struct RampingU64Schedule {
    start: u64,
    stages: Vec<Stage>,
    mode: RampMode,
    cumulative_ends: Vec<Duration>,
}

impl RampingU64Schedule {
    pub fn new(start: u64, stages: Vec<Stage>, mode: RampMode) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            mode,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn mode(&self) -> RampMode {
        self.mode
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Highest concurrency the profile ever asks for.
    pub fn max_target(&self) -> u64 {
        let stage_max = self.stages.iter().map(|s| s.target).max().unwrap_or(0);
        match self.mode {
            RampMode::Linear => stage_max.max(self.start),
            // A stepped profile never holds `start`.
            RampMode::Stepped => stage_max,
        }
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn stage_index(&self, elapsed: Duration) -> usize {
        let idx = match self.mode {
            // Stage `i` covers `[start_i, end_i)`.
            RampMode::Stepped => self.cumulative_ends.partition_point(|end| *end <= elapsed),
            // Stage `i` covers `(start_i, end_i]`, so a boundary reports the stage's end target.
            RampMode::Linear => self.cumulative_ends.partition_point(|end| *end < elapsed),
        };
        idx.min(self.stages.len().saturating_sub(1))
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn stage_start_target(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() {
            return self.start;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let idx = self.stage_index(elapsed);
        let stage = &self.stages[idx];

        match self.mode {
            RampMode::Stepped => stage.target,
            RampMode::Linear => {
                if elapsed.is_zero() {
                    return self.start;
                }

                let (stage_start, stage_end) = self.stage_bounds(idx);
                let stage_duration = stage_end.saturating_sub(stage_start);
                let stage_elapsed = elapsed.saturating_sub(stage_start);

                let start_target = self.stage_start_target(idx);
                let end_target = stage.target;

                if stage_duration.is_zero() {
                    return end_target;
                }

                let start_i = start_target as i128;
                let end_i = end_target as i128;
                let delta = end_i - start_i;

                let num = stage_elapsed.as_nanos() as i128;
                let den = stage_duration.as_nanos() as i128;

                let cur = start_i + (delta.saturating_mul(num) / den.max(1));
                cur.clamp(0, u64::MAX as i128) as u64
            }
        }
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = if clamped >= total {
            self.stages.len().saturating_sub(1)
        } else {
            self.stage_index(clamped)
        };

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);
        let stage_remaining = stage_duration.saturating_sub(stage_elapsed);

        let end_target = self.stages[idx].target;
        let start_target = match self.mode {
            RampMode::Stepped => end_target,
            RampMode::Linear => self.stage_start_target(idx),
        };

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        })
    }

    /// How long an inactive VU (1-based `vu_index`) can sleep before the target may include it.
    pub fn next_recheck_in(&self, elapsed: Duration, vu_index: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        if self.stages.is_empty() {
            return default_sleep;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return Duration::ZERO;
        }

        // Already active: a short sleep picks up ramp-down promptly.
        if vu_index <= self.target_at(elapsed) {
            return Duration::from_millis(1);
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end) = self.stage_bounds(idx);
        let until_stage_end = stage_end.saturating_sub(elapsed);

        if self.mode == RampMode::Stepped {
            // Targets only change on stage boundaries.
            return until_stage_end.min(default_sleep);
        }

        let start_target = self.stage_start_target(idx);
        let end_target = self.stages[idx].target;

        // Decreasing (or flat) ramp: this VU can't become active within this stage.
        if end_target <= start_target {
            return until_stage_end.min(default_sleep);
        }

        // Increasing ramp: solve start + (end-start)*t/dur >= vu_index for t.
        let start_i = start_target as i128;
        let end_i = end_target as i128;
        let want = vu_index as i128;

        if want <= start_i {
            return Duration::ZERO;
        }
        if want > end_i {
            return until_stage_end.min(default_sleep);
        }

        let stage_ns = stage_end.saturating_sub(stage_start).as_nanos() as i128;
        let elapsed_ns = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let delta = end_i - start_i;

        let needed_ns = ((want - start_i).saturating_mul(stage_ns) / delta).max(0);
        let wait_ns = needed_ns.saturating_sub(elapsed_ns).max(0);
        let wait = Duration::from_nanos(wait_ns.min(u64::MAX as i128) as u64);

        wait.min(default_sleep)
    }
}
