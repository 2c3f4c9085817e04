//! Per-stage and per-turn latency tracking.
//!
//! Stage durations land in a bounded sample history; completed turns land in
//! a bounded turn history from which the rolling statistics are computed.
//! A degradation signal is raised when turns keep missing the total target,
//! or when a turn is far slower than the learned baseline.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use voxturn_core::{
    BoundedHistory, LatencyBreakdown, LatencyConfig, LatencySample, Stage, TurnId,
};

/// Returned by [`LatencyMonitor::begin_stage`]; hand it back to
/// [`LatencyMonitor::end_stage`] when the stage finishes.
#[derive(Debug)]
#[must_use = "a stage token records nothing until passed to end_stage"]
pub struct StageToken {
    turn_id: TurnId,
    stage: Stage,
    started: Instant,
}

impl StageToken {
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationReason {
    ConsecutiveMisses,
    AboveBaseline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationSignal {
    pub turn_id: TurnId,
    pub reason: DegradationReason,
    pub total_ms: f64,
    pub baseline_ms: Option<f64>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageCompliance {
    pub stage: Stage,
    pub target_ms: f64,
    pub samples: usize,
    pub within_target: usize,
}

impl StageCompliance {
    /// Fraction of samples within the stage ceiling; 1.0 with no samples.
    pub fn rate(&self) -> f64 {
        if self.samples == 0 {
            1.0
        } else {
            self.within_target as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub turns_recorded: u64,
    pub window_turns: usize,
    pub target_ms: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub baseline_ms: Option<f64>,
    pub degraded: bool,
    pub stages: Vec<StageCompliance>,
}

struct MonitorState {
    samples: BoundedHistory<LatencySample>,
    turns: BoundedHistory<LatencyBreakdown>,
    baseline_seed: Vec<f64>,
    baseline_ms: Option<f64>,
    consecutive_failures: u32,
    turns_recorded: u64,
    degraded: bool,
}

pub struct LatencyMonitor {
    config: LatencyConfig,
    state: Mutex<MonitorState>,
}

impl LatencyMonitor {
    pub fn new(config: LatencyConfig) -> Self {
        let state = MonitorState {
            samples: BoundedHistory::new(config.history_capacity),
            turns: BoundedHistory::new(config.history_capacity.max(config.window)),
            baseline_seed: Vec::with_capacity(config.baseline_turns),
            baseline_ms: None,
            consecutive_failures: 0,
            turns_recorded: 0,
            degraded: false,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin_stage(&self, turn_id: TurnId, stage: Stage) -> StageToken {
        StageToken {
            turn_id,
            stage,
            started: Instant::now(),
        }
    }

    /// Close a stage and append its sample. Returns the duration in ms.
    pub fn end_stage(&self, token: StageToken) -> f64 {
        let duration_ms = token.started.elapsed().as_secs_f64() * 1000.0;
        self.record_stage(token.turn_id, token.stage, duration_ms);
        duration_ms
    }

    pub fn record_stage(&self, turn_id: TurnId, stage: Stage, duration_ms: f64) {
        let target = self.config.stage_target(stage);
        if duration_ms > target {
            tracing::debug!(
                turn_id,
                stage = %stage,
                duration_ms,
                target_ms = target,
                "stage over ceiling"
            );
        }
        self.lock().samples.push(LatencySample {
            turn_id,
            stage,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    /// Append a completed turn and update the running aggregates.
    pub fn record_turn(&self, breakdown: LatencyBreakdown) -> Option<DegradationSignal> {
        let mut state = self.lock();
        let turn_id = breakdown.turn_id;
        let total_ms = breakdown.total_ms;

        state.turns_recorded += 1;
        if breakdown.target_met {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
        }

        if state.baseline_ms.is_none() {
            state.baseline_seed.push(total_ms);
            if state.baseline_seed.len() >= self.config.baseline_turns.max(1) {
                let baseline = mean(&state.baseline_seed);
                state.baseline_ms = Some(baseline);
                state.baseline_seed.clear();
                tracing::info!(baseline_ms = baseline, "latency baseline established");
            }
        }

        state.turns.push(breakdown);

        let signal = if state.consecutive_failures >= self.config.consecutive_threshold {
            Some(DegradationReason::ConsecutiveMisses)
        } else {
            match state.baseline_ms {
                Some(baseline)
                    if total_ms > baseline * self.config.degradation_multiplier =>
                {
                    Some(DegradationReason::AboveBaseline)
                }
                _ => None,
            }
        }
        .map(|reason| DegradationSignal {
            turn_id,
            reason,
            total_ms,
            baseline_ms: state.baseline_ms,
            consecutive_failures: state.consecutive_failures,
        });

        state.degraded = signal.is_some();
        if let Some(signal) = &signal {
            tracing::warn!(
                turn_id,
                reason = ?signal.reason,
                total_ms,
                baseline_ms = ?signal.baseline_ms,
                consecutive_failures = signal.consecutive_failures,
                "latency degradation"
            );
        }
        signal
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn baseline_ms(&self) -> Option<f64> {
        self.lock().baseline_ms
    }

    pub fn is_degraded(&self) -> bool {
        self.lock().degraded
    }

    /// Forget the baseline; the next `baseline_turns` turns establish a new
    /// one.
    pub fn reset_baseline(&self) {
        let mut state = self.lock();
        state.baseline_ms = None;
        state.baseline_seed.clear();
        state.degraded = false;
        tracing::info!("latency baseline reset");
    }

    /// Fraction of turns in the rolling window that met the total target.
    pub fn success_rate(&self) -> f64 {
        let state = self.lock();
        window_success_rate(&state, self.config.window)
    }

    pub fn recent_samples(&self, n: usize) -> Vec<LatencySample> {
        self.lock().samples.recent(n).cloned().collect()
    }

    pub fn summary(&self) -> PerformanceSummary {
        let state = self.lock();
        let totals: Vec<f64> = state
            .turns
            .recent(self.config.window)
            .map(|t| t.total_ms)
            .collect();

        let mut sorted = totals.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut counts: BTreeMap<Stage, (usize, usize)> = BTreeMap::new();
        for sample in state.samples.iter() {
            let entry = counts.entry(sample.stage).or_default();
            entry.0 += 1;
            if sample.duration_ms <= self.config.stage_target(sample.stage) {
                entry.1 += 1;
            }
        }
        let stages = Stage::ALL
            .iter()
            .map(|&stage| {
                let (samples, within_target) = counts.get(&stage).copied().unwrap_or_default();
                StageCompliance {
                    stage,
                    target_ms: self.config.stage_target(stage),
                    samples,
                    within_target,
                }
            })
            .collect();

        PerformanceSummary {
            turns_recorded: state.turns_recorded,
            window_turns: totals.len(),
            target_ms: self.config.target_ms,
            mean_ms: mean(&totals),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            success_rate: window_success_rate(&state, self.config.window),
            consecutive_failures: state.consecutive_failures,
            baseline_ms: state.baseline_ms,
            degraded: state.degraded,
            stages,
        }
    }

    /// Latency-side tuning hints.
    pub fn recommendations(&self) -> Vec<String> {
        let summary = self.summary();
        let mut out = Vec::new();
        if summary.window_turns == 0 {
            return out;
        }

        if summary.p95_ms > summary.target_ms {
            out.push(format!(
                "p95 latency {:.0} ms exceeds the {:.0} ms target; consider smaller models or shorter responses",
                summary.p95_ms, summary.target_ms
            ));
        }
        for stage in &summary.stages {
            if stage.samples > 0 && stage.rate() < 0.9 {
                out.push(format!(
                    "{} stage meets its {:.0} ms ceiling in only {:.0}% of calls",
                    stage.stage,
                    stage.target_ms,
                    stage.rate() * 100.0
                ));
            }
        }
        if summary.success_rate < 0.8 {
            out.push(format!(
                "only {:.0}% of recent turns met the latency target",
                summary.success_rate * 100.0
            ));
        }
        if summary.degraded {
            out.push(
                "latency is degraded relative to baseline; clearing accelerator memory may help"
                    .to_string(),
            );
        }
        out
    }
}

fn window_success_rate(state: &MonitorState, window: usize) -> f64 {
    let (total, met) = state
        .turns
        .recent(window)
        .fold((0usize, 0usize), |(total, met), t| {
            (total + 1, met + usize::from(t.target_met))
        });
    if total == 0 {
        1.0
    } else {
        met as f64 / total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
